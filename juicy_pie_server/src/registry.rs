// Command registry: command name → handler.
//
// The registry is built once during startup wiring, then frozen behind an
// `Arc` and shared read-only by every session. Nothing registers or removes
// handlers while sessions are live, so reads need no locking.
//
// Each handler receives a dense `HandlerId` at registration. Session
// attachments store per-handler contexts in a `Vec` indexed by that id instead
// of keying a map on handler identity. Re-registering a name replaces the
// handler but keeps its id.

use std::collections::BTreeMap;

use crate::attachment::Attachment;
use crate::error::CommandError;
use crate::handler::{Call, Handler, ValueFn, VoidFn};

/// Registry-assigned handler identity (index into the handler table).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u32);

impl HandlerId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

struct Entry<W> {
    name: String,
    handler: Box<dyn Handler<W>>,
}

/// Name → handler table for a host world `W`.
pub struct Registry<W> {
    entries: Vec<Entry<W>>,
    by_name: BTreeMap<String, HandlerId>,
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Registry<W> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: BTreeMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous handler with
    /// that name. Returns the handler's id.
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> HandlerId
    where
        H: Handler<W> + 'static,
    {
        let name = name.into();
        let handler: Box<dyn Handler<W>> = Box::new(handler);
        if let Some(&id) = self.by_name.get(&name) {
            self.entries[id.index()].handler = handler;
            return id;
        }
        let id = HandlerId(self.entries.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.entries.push(Entry { name, handler });
        id
    }

    /// Register a value-returning closure.
    pub fn register_value<F>(&mut self, name: impl Into<String>, f: F) -> HandlerId
    where
        W: 'static,
        F: Fn(&mut Call<'_, W>) -> Result<String, CommandError> + 'static,
    {
        self.register(name, ValueFn(f))
    }

    /// Register a side-effect-only closure; the client receives `SUCCESS`.
    pub fn register_void<F>(&mut self, name: impl Into<String>, f: F) -> HandlerId
    where
        W: 'static,
        F: Fn(&mut Call<'_, W>) -> Result<(), CommandError> + 'static,
    {
        self.register(name, VoidFn(f))
    }

    /// Look up a handler by command name. Absence is not an error here; the
    /// session turns it into a `Fail` reply.
    pub fn get_handler(&self, name: &str) -> Option<(HandlerId, &dyn Handler<W>)> {
        let id = *self.by_name.get(name)?;
        Some((id, self.entries[id.index()].handler.as_ref()))
    }

    pub fn handler(&self, id: HandlerId) -> Option<&dyn Handler<W>> {
        self.entries.get(id.index()).map(|entry| entry.handler.as_ref())
    }

    pub fn name(&self, id: HandlerId) -> Option<&str> {
        self.entries.get(id.index()).map(|entry| entry.name.as_str())
    }

    /// All handlers in registration order.
    pub fn handlers(&self) -> impl Iterator<Item = (HandlerId, &dyn Handler<W>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (HandlerId(i as u32), entry.handler.as_ref()))
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ask every handler for its session context and store the ones produced.
    /// Runs once per session, when the session opens.
    pub fn create_contexts(&self, host: &W, attachment: &mut Attachment) {
        for (id, handler) in self.handlers() {
            if let Some(context) = handler.create_context(host, attachment) {
                attachment.insert(id, context);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use juicy_pie_protocol::parse_line;

    use super::*;
    use crate::handler::Response;

    struct Counter;

    impl Handler<u32> for Counter {
        fn invoke(&self, call: &mut Call<'_, u32>) -> Result<Response, CommandError> {
            *call.world += 1;
            Ok(Response::Reply(call.world.to_string()))
        }

        fn create_context(&self, host: &u32, _attachment: &Attachment) -> Option<Box<dyn Any>> {
            Some(Box::new(*host * 10))
        }
    }

    fn invoke(registry: &Registry<u32>, world: &mut u32, line: &str) -> Response {
        let instruction = parse_line(line).unwrap();
        let (id, handler) = registry.get_handler(instruction.command()).unwrap();
        let mut attachment = Attachment::new(None);
        let mut call = Call {
            world,
            attachment: &mut attachment,
            instruction,
            handler_id: id,
            registry,
        };
        handler.invoke(&mut call).unwrap()
    }

    #[test]
    fn ids_are_dense_in_registration_order() {
        let mut registry = Registry::<u32>::new();
        let a = registry.register("a", Counter);
        let b = registry.register_value("b", |_call| Ok("b".into()));
        assert_eq!(a, HandlerId(0));
        assert_eq!(b, HandlerId(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.name(b), Some("b"));
    }

    #[test]
    fn lookup_miss_is_none() {
        let registry = Registry::<u32>::new();
        assert!(registry.get_handler("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn re_register_replaces_and_keeps_id() {
        let mut registry = Registry::<u32>::new();
        let first = registry.register_value("echo", |_call| Ok("old".into()));
        let second = registry.register_value("echo", |_call| Ok("new".into()));
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);

        let mut world = 0;
        assert_eq!(
            invoke(&registry, &mut world, "echo()"),
            Response::Reply("new".into())
        );
    }

    #[test]
    fn handlers_mutate_world() {
        let mut registry = Registry::<u32>::new();
        registry.register("count", Counter);
        registry.register_void("reset", |call| {
            *call.world = 0;
            Ok(())
        });

        let mut world = 5;
        assert_eq!(
            invoke(&registry, &mut world, "count()"),
            Response::Reply("6".into())
        );
        assert_eq!(invoke(&registry, &mut world, "reset()"), Response::Done);
        assert_eq!(world, 0);
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = Registry::<u32>::new();
        registry.register("world.getHeight", Counter);
        registry.register("chat.post", Counter);
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["chat.post", "world.getHeight"]);
    }

    #[test]
    fn create_contexts_only_for_handlers_that_want_one() {
        let mut registry = Registry::<u32>::new();
        registry.register_value("plain", |_call| Ok(String::new()));
        let stateful = registry.register("stateful", Counter);

        let mut attachment = Attachment::new(None);
        registry.create_contexts(&7, &mut attachment);
        assert_eq!(attachment.context_count(), 1);
        assert_eq!(attachment.get_context::<u32>(stateful), Some(&70));
        assert!(attachment.get_context::<u32>(HandlerId(0)).is_none());
    }
}
