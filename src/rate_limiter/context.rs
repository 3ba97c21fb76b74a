//! Per-thread client identity.
//!
//! Every request is accounted to one of [`NUM_CLIENTS`] logical clients,
//! each with its own token bucket and queue set. The calling thread carries
//! its client in thread-local context: storage-engine worker pools tag
//! their threads once, and every request issued from that thread lands in
//! the right bucket without threading an id through each call site.
//!
//! Prefer the scoped [`ClientScope`] guard, which restores the previous tag
//! on drop; [`set_thread_client`] is the unscoped fallback for callers that
//! own the thread for its whole lifetime.
//!
//! ```rust
//! use iorate::{ClientId, ClientScope, ClientTag};
//!
//! let client = ClientId::new(3).expect("3 < NUM_CLIENTS");
//! {
//!     let _scope = ClientScope::enter(ClientTag::Client(client));
//!     assert_eq!(iorate::thread_client(), ClientTag::Client(client));
//! }
//! // The previous tag is back once the scope ends.
//! assert_eq!(iorate::thread_client(), ClientTag::Unset);
//! ```

use std::cell::Cell;
use std::marker::PhantomData;

/// Number of logical clients the limiter isolates from one another.
pub const NUM_CLIENTS: usize = 5;

/// Identifier of one logical client, guaranteed to be `< NUM_CLIENTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(usize);

impl ClientId {
    /// Client that absorbs requests from threads that never set a tag,
    /// historically the flush workers.
    pub(crate) const FALLBACK: ClientId = ClientId(1);

    /// Creates a client id, or `None` when `index` is out of range.
    pub const fn new(index: usize) -> Option<ClientId> {
        if index < NUM_CLIENTS {
            Some(ClientId(index))
        } else {
            None
        }
    }

    /// The underlying index in `[0, NUM_CLIENTS)`.
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// The client tag a thread carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientTag {
    /// No client was ever assigned. Requests are accounted to the
    /// maintenance client (client 1) rather than rejected.
    Unset,
    /// The caller's context is known to be bad. Requests from such a
    /// thread return immediately without touching quota or queues.
    Invalid,
    /// A concrete client.
    Client(ClientId),
}

impl ClientTag {
    /// Maps the tag to the client that will be billed, or `None` when the
    /// request must be dropped.
    #[inline]
    pub fn resolve(self) -> Option<ClientId> {
        match self {
            ClientTag::Unset => Some(ClientId::FALLBACK),
            ClientTag::Invalid => None,
            ClientTag::Client(id) => Some(id),
        }
    }
}

thread_local! {
    static CURRENT_CLIENT: Cell<ClientTag> = const { Cell::new(ClientTag::Unset) };
}

/// Returns the calling thread's client tag.
#[inline]
pub fn thread_client() -> ClientTag {
    CURRENT_CLIENT.with(Cell::get)
}

/// Replaces the calling thread's client tag for the rest of the thread's
/// lifetime (or until overwritten). Prefer [`ClientScope`] where the tag
/// should only apply to a region of code.
#[inline]
pub fn set_thread_client(tag: ClientTag) {
    CURRENT_CLIENT.with(|current| current.set(tag));
}

/// RAII guard that sets the thread's client tag and restores the previous
/// one on drop.
///
/// The guard is deliberately not `Send`: it manipulates thread-local state
/// and must be dropped on the thread that created it.
#[derive(Debug)]
pub struct ClientScope {
    previous: ClientTag,
    // Thread-local guard, keep it on the creating thread.
    _not_send: PhantomData<*const ()>,
}

impl ClientScope {
    /// Sets `tag` for the calling thread and returns the guard.
    pub fn enter(tag: ClientTag) -> ClientScope {
        let previous = thread_client();
        set_thread_client(tag);
        ClientScope {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ClientScope {
    fn drop(&mut self) {
        set_thread_client(self.previous);
    }
}
