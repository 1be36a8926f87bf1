//! Command dispatch against the engine's serialized state.
//!
//! Commands arrive as a [`Value::List`] (first item is the command name,
//! the rest are positional arguments) or as a [`Value::Map`] with a `name`
//! entry and named arguments. Text command lines are split into string
//! arguments first. Handlers run with the engine lock held and reach shared
//! state only through [`CommandContext`].

mod builtin;
mod line;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::engine::{Engine, EngineState};
use crate::{BusError, CancelToken, Event, EventKind, Format, LogLevel, Result, Value};

/// A parsed command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    args: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Command {
    /// Parses a list or map invocation.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::List(items) => {
                let (first, rest) = items.split_first().ok_or(BusError::InvalidParameter)?;
                let name = first.as_str().filter(|n| !n.is_empty()).ok_or(BusError::InvalidParameter)?;
                Ok(Self {
                    name: name.to_string(),
                    args: rest.to_vec(),
                    named: Vec::new(),
                })
            }
            Value::Map(entries) => {
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .ok_or(BusError::InvalidParameter)?;
                let named = entries
                    .iter()
                    .filter(|(key, _)| key != "name" && key != "_flags")
                    .cloned()
                    .collect();
                Ok(Self {
                    name: name.to_string(),
                    args: Vec::new(),
                    named,
                })
            }
            _ => Err(BusError::InvalidParameter),
        }
    }

    /// Parses a text command line such as `set volume 50`. Every argument
    /// is passed as a string.
    pub fn parse_line(line: &str) -> Result<Self> {
        Self::parse(&Value::args(line::split(line)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Positional arguments following the command name.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument by position, or by name for map-style invocations.
    pub fn arg(&self, index: usize, key: &str) -> Option<&Value> {
        self.args
            .get(index)
            .or_else(|| self.named.iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    pub fn require(&self, index: usize, key: &str) -> Result<&Value> {
        self.arg(index, key).ok_or(BusError::InvalidParameter)
    }

    pub fn str_arg(&self, index: usize, key: &str) -> Result<&str> {
        self.require(index, key)?
            .as_str()
            .ok_or(BusError::InvalidParameter)
    }
}

/// Executes one command on the engine.
pub trait CommandHandler: Send + Sync {
    fn run(&self, ctx: &mut CommandContext<'_>, command: &Command) -> Result<Value>;
}

impl<F> CommandHandler for F
where
    F: Fn(&mut CommandContext<'_>, &Command) -> Result<Value> + Send + Sync,
{
    fn run(&self, ctx: &mut CommandContext<'_>, command: &Command) -> Result<Value> {
        self(ctx, command)
    }
}

pub(crate) struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        builtin::register(&mut registry);
        registry
    }

    /// Registers or replaces a handler.
    pub fn insert(&mut self, name: &str, handler: Arc<dyn CommandHandler>) -> Result<()> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(BusError::InvalidParameter);
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("CommandRegistry").field("commands", &names).finish()
    }
}

/// What a running command may do to the engine.
pub struct CommandContext<'a> {
    engine: &'a Engine,
    state: MutexGuard<'a, EngineState>,
    caller: u64,
    cancel: Option<CancelToken>,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        state: MutexGuard<'a, EngineState>,
        caller: u64,
        cancel: Option<CancelToken>,
    ) -> Self {
        Self {
            engine,
            state,
            caller,
            cancel,
        }
    }

    /// Id of the handle that issued the command.
    pub fn caller_id(&self) -> u64 {
        self.caller
    }

    /// Whether the issuing handle asked for this request to be aborted.
    /// Always `false` for synchronous commands.
    pub fn abort_requested(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    pub fn get_property(&self, name: &str) -> Result<Value> {
        self.state.properties.get(name).cloned()
    }

    pub fn get_property_as(&self, name: &str, format: Format) -> Result<Value> {
        self.state.properties.get_as(name, format)
    }

    /// Writes a property with the same rules as a client write.
    pub fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        self.state.set_property(name, value)
    }

    /// Host-side write that ignores writability. `None` makes the property
    /// unavailable.
    pub fn update_property(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        self.state.update_property(name, value)
    }

    pub fn declare_property(&mut self, name: &str, initial: Option<Value>, writable: bool) -> Result<()> {
        self.state.declare_property(name, initial, writable)
    }

    /// Broadcasts an unsolicited event to every handle that has it enabled.
    pub fn emit(&self, kind: EventKind) -> Result<()> {
        if !kind.is_unsolicited() {
            return Err(BusError::InvalidParameter);
        }
        self.state.broadcast(&Event::new(kind));
        Ok(())
    }

    pub fn log(&self, level: LogLevel, prefix: &str, text: &str) {
        self.state.log(level, prefix, text);
    }

    /// Sends a client message to the handle named `target` (or `@<id>`), or
    /// to every handle when `target` is `None`.
    pub fn client_message(&self, target: Option<&str>, args: Vec<String>) -> Result<()> {
        self.state.client_message(target, args)
    }

    /// Starts engine shutdown: every handle receives a shutdown event.
    pub fn quit(&mut self) {
        self.state.begin_shutdown();
    }

    /// Runs hook `name`, releasing the engine lock until every handler has
    /// continued. Returns how many handlers ran.
    pub fn run_hook(&mut self, name: &str) -> usize {
        let hooks = self.engine.hooks();
        MutexGuard::unlocked(&mut self.state, || hooks.fire(name))
    }
}

impl fmt::Debug for CommandContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("caller", &self.caller)
            .field("abort_requested", &self.abort_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_commands() {
        let command = Command::parse(&Value::args(["set", "volume", "50"])).unwrap();
        assert_eq!(command.name(), "set");
        assert_eq!(command.args().len(), 2);
        assert_eq!(command.str_arg(0, "name").unwrap(), "volume");
    }

    #[test]
    fn parses_named_commands() {
        let value = Value::map([
            ("name", Value::from("set")),
            ("value", Value::Int64(5)),
            ("_flags", Value::List(vec![])),
        ]);
        let command = Command::parse(&value).unwrap();
        assert_eq!(command.name(), "set");
        assert!(command.args().is_empty());
        assert_eq!(command.arg(1, "value"), Some(&Value::Int64(5)));
        assert_eq!(command.arg(0, "_flags"), None);
    }

    #[test]
    fn parses_text_lines() {
        let command = Command::parse_line(r#"script-message-to ui "hello there""#).unwrap();
        assert_eq!(command.name(), "script-message-to");
        assert_eq!(command.args(), [Value::from("ui"), Value::from("hello there")]);
        assert_eq!(Command::parse_line(""), Err(BusError::InvalidParameter));
        assert_eq!(Command::parse_line("# only a comment"), Err(BusError::InvalidParameter));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(Command::parse(&Value::List(vec![])), Err(BusError::InvalidParameter));
        assert_eq!(
            Command::parse(&Value::List(vec![Value::Int64(1)])),
            Err(BusError::InvalidParameter)
        );
        assert_eq!(Command::parse(&Value::from("quit")), Err(BusError::InvalidParameter));
        assert_eq!(
            Command::parse(&Value::map([("value", Value::Int64(1))])),
            Err(BusError::InvalidParameter)
        );
    }

    #[test]
    fn registry_rejects_bad_names() {
        let mut registry = CommandRegistry::with_builtins();
        let noop = |_: &mut CommandContext<'_>, _: &Command| -> Result<Value> { Ok(Value::None) };
        assert_eq!(registry.insert("", Arc::new(noop)), Err(BusError::InvalidParameter));
        assert_eq!(registry.insert("two words", Arc::new(noop)), Err(BusError::InvalidParameter));
        assert!(registry.insert("load", Arc::new(noop)).is_ok());
        assert!(registry.contains("load"));
        assert!(registry.contains("quit"));
    }
}
