// `script.eval(src,)`: evaluate a Rhai snippet in a per-session interpreter.
//
// Each session gets its own `rhai::Engine` and `Scope` as its handler
// context, so top-level `let` bindings persist between calls on one
// connection and are invisible to every other connection. The interpreter is
// dropped with the session's attachment.
//
// The source is the whole argument blob (`Instruction::all_arguments`), so
// snippets may contain commas. The reply is a single line:
// `Successful evaluation of <src>: <value>` or `Failed evaluation of <src>:
// <error>`; any newline in either part is flattened to a space.
//
// Registered only when `features.script_eval` is enabled.

use std::any::Any;

use rhai::{Dynamic, Engine, Scope};

use crate::attachment::Attachment;
use crate::error::CommandError;
use crate::handler::{Call, Handler, Response};

/// Operation budget per evaluation; a runaway loop fails instead of stalling
/// the tick.
pub const MAX_OPERATIONS: u64 = 500_000;
pub const MAX_CALL_LEVELS: usize = 64;

pub struct ScriptContext {
    engine: Engine,
    scope: Scope<'static>,
}

impl ScriptContext {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        Self {
            engine,
            scope: Scope::new(),
        }
    }

    pub fn eval(&mut self, source: &str) -> String {
        let source = source.trim();
        let reply = match self.engine.eval_with_scope::<Dynamic>(&mut self.scope, source) {
            Ok(value) if value.is_unit() => format!("Successful evaluation of {source}"),
            Ok(value) => format!("Successful evaluation of {source}: {value}"),
            Err(e) => format!("Failed evaluation of {source}: {e}"),
        };
        reply.replace(['\r', '\n'], " ")
    }
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScriptEval;

impl ScriptEval {
    pub const NAME: &'static str = "script.eval";
}

impl<W> Handler<W> for ScriptEval {
    fn invoke(&self, call: &mut Call<'_, W>) -> Result<Response, CommandError> {
        let source = call.instruction.all_arguments();
        let context = call
            .context_mut::<ScriptContext>()
            .ok_or(CommandError::MissingContext(Self::NAME))?;
        Ok(Response::Reply(context.eval(&source)))
    }

    fn create_context(&self, _host: &W, _attachment: &Attachment) -> Option<Box<dyn Any>> {
        Some(Box::new(ScriptContext::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_values() {
        let mut context = ScriptContext::new();
        assert_eq!(context.eval("1 + 2"), "Successful evaluation of 1 + 2: 3");
        assert_eq!(context.eval("let x = 4;"), "Successful evaluation of let x = 4;");
    }

    #[test]
    fn bindings_persist_within_a_context() {
        let mut context = ScriptContext::new();
        context.eval("let total = 10;");
        assert_eq!(
            context.eval("total * 2"),
            "Successful evaluation of total * 2: 20"
        );
    }

    #[test]
    fn contexts_are_isolated() {
        let mut a = ScriptContext::new();
        let mut b = ScriptContext::new();
        a.eval("let secret = 1;");
        assert!(b.eval("secret").starts_with("Failed evaluation of secret: "));
    }

    #[test]
    fn runaway_scripts_fail() {
        let mut context = ScriptContext::new();
        let reply = context.eval("loop {}");
        assert!(reply.starts_with("Failed evaluation of loop {}: "), "{reply}");
    }

    #[test]
    fn reply_is_one_line() {
        let mut context = ScriptContext::new();
        let reply = context.eval("let s = \"a\";\ns +\n");
        assert!(!reply.contains('\n'), "{reply}");
    }
}
