// Per-session context store.
//
// An `Attachment` belongs to exactly one session. It holds the opaque state
// that handlers asked for through `Handler::create_context` (a script
// interpreter, an event cursor), indexed by `HandlerId`. Contexts are created
// eagerly in one pass when the session opens (`Registry::create_contexts`)
// and released exactly once by `close()`, whether or not the client ever used
// them. Release is `Drop`: a context that owns resources frees them in its
// `Drop` impl.
//
// Only the simulation thread touches an attachment (through `Session::tick`
// and `Session::close`), so it needs no synchronization and its contexts need
// not be `Send`.

use std::any::Any;
use std::net::SocketAddr;

use crate::registry::HandlerId;

/// Session-scoped handler state.
pub struct Attachment {
    peer: Option<SocketAddr>,
    contexts: Vec<Option<Box<dyn Any>>>,
    closed: bool,
}

impl Attachment {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            contexts: Vec::new(),
            closed: false,
        }
    }

    /// Remote address of the owning session's client.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub(crate) fn insert(&mut self, id: HandlerId, context: Box<dyn Any>) {
        if self.closed {
            return;
        }
        let index = id.index();
        if self.contexts.len() <= index {
            self.contexts.resize_with(index + 1, || None);
        }
        self.contexts[index] = Some(context);
    }

    /// The context created for handler `id`, if any and if it has type `T`.
    pub fn get_context<T: 'static>(&self, id: HandlerId) -> Option<&T> {
        self.contexts
            .get(id.index())?
            .as_ref()?
            .downcast_ref::<T>()
    }

    pub fn context_mut<T: 'static>(&mut self, id: HandlerId) -> Option<&mut T> {
        self.contexts
            .get_mut(id.index())?
            .as_mut()?
            .downcast_mut::<T>()
    }

    pub fn has_context(&self, id: HandlerId) -> bool {
        matches!(self.contexts.get(id.index()), Some(Some(_)))
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release every context, in handler registration order. Returns how many
    /// were released; a second call releases nothing.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let released = self.context_count();
        for slot in &mut self.contexts {
            drop(slot.take());
        }
        self.contexts.clear();
        released
    }
}
