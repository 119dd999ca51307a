// The handler contract between sessions and domain code.
//
// A `Handler<W>` implements one protocol command against a host world `W`.
// Handlers only ever run inside `Session::tick()`, on the simulation thread,
// with exclusive `&mut W` access, so they may touch live simulation state
// without locking.
//
// Shapes and capabilities are expressed as trait methods the session queries
// per handler, never by downcasting:
// - `invoke` returns `Response::Reply(text)` for value-returning commands or
//   `Response::Done` for side-effect-only commands (the session then replies
//   with `SUCCESS`). Failures are returned as `CommandError` and become the
//   reply text.
// - `create_context` optionally produces per-session state, created once when
//   a session opens and dropped when it closes (see `attachment.rs`).
// - `as_clearable` optionally exposes a way to discard pending per-session
//   state; maintenance commands use it to reset every handler uniformly.
//
// Closures can be registered directly through `Registry::register_value` and
// `Registry::register_void`, which wrap them in the adapters defined here.

use std::any::Any;

use juicy_pie_protocol::Instruction;

use crate::attachment::Attachment;
use crate::error::CommandError;
use crate::registry::{HandlerId, Registry};

/// What a handler produced for one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Send this text as the reply line.
    Reply(String),
    /// The command had no value; reply with the fixed acknowledgement.
    Done,
}

/// Everything a handler can reach while serving one command.
pub struct Call<'a, W> {
    pub world: &'a mut W,
    pub attachment: &'a mut Attachment,
    pub instruction: Instruction,
    pub(crate) handler_id: HandlerId,
    pub(crate) registry: &'a Registry<W>,
}

impl<'a, W> Call<'a, W> {
    /// Identity of the handler being invoked, as assigned by the registry.
    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    /// The registry that dispatched this call.
    pub fn registry(&self) -> &'a Registry<W> {
        self.registry
    }

    /// This handler's session context, if one was created and has type `T`.
    pub fn context_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.attachment.context_mut::<T>(self.handler_id)
    }
}

/// One protocol command.
pub trait Handler<W> {
    fn invoke(&self, call: &mut Call<'_, W>) -> Result<Response, CommandError>;

    /// Per-session state for this handler. Called once per session, at
    /// session start. Resources held by the returned value are released when
    /// it is dropped at session close.
    fn create_context(&self, _host: &W, _attachment: &Attachment) -> Option<Box<dyn Any>> {
        None
    }

    fn as_clearable(&self) -> Option<&dyn Clearable<W>> {
        None
    }
}

/// Handlers that buffer per-session state which a client may ask to discard.
pub trait Clearable<W> {
    fn clear_pending(&self, host: &W, attachment: &mut Attachment, id: HandlerId);
}

pub(crate) struct ValueFn<F>(pub(crate) F);

impl<W, F> Handler<W> for ValueFn<F>
where
    F: Fn(&mut Call<'_, W>) -> Result<String, CommandError>,
{
    fn invoke(&self, call: &mut Call<'_, W>) -> Result<Response, CommandError> {
        (self.0)(call).map(Response::Reply)
    }
}

pub(crate) struct VoidFn<F>(pub(crate) F);

impl<W, F> Handler<W> for VoidFn<F>
where
    F: Fn(&mut Call<'_, W>) -> Result<(), CommandError>,
{
    fn invoke(&self, call: &mut Call<'_, W>) -> Result<Response, CommandError> {
        (self.0)(call).map(|()| Response::Done)
    }
}
