use std::sync::Arc;

use super::{Command, CommandContext, CommandRegistry};
use crate::{LogLevel, Result, Value};

pub(super) fn register(registry: &mut CommandRegistry) {
    let builtins: [(&str, Arc<dyn super::CommandHandler>); 6] = [
        ("ignore", Arc::new(ignore)),
        ("set", Arc::new(set)),
        ("print-text", Arc::new(print_text)),
        ("script-message", Arc::new(script_message)),
        ("script-message-to", Arc::new(script_message_to)),
        ("quit", Arc::new(quit)),
    ];
    for (name, handler) in builtins {
        registry.handlers.insert(name.to_string(), handler);
    }
}

fn ignore(_: &mut CommandContext<'_>, _: &Command) -> Result<Value> {
    Ok(Value::None)
}

fn set(ctx: &mut CommandContext<'_>, command: &Command) -> Result<Value> {
    let name = command.str_arg(0, "name")?;
    let value = command.require(1, "value")?.clone();
    ctx.set_property(name, value)?;
    Ok(Value::None)
}

fn print_text(ctx: &mut CommandContext<'_>, command: &Command) -> Result<Value> {
    let text = command.require(0, "text")?.to_string();
    ctx.log(LogLevel::Info, "cplayer", &text);
    Ok(Value::None)
}

fn script_message(ctx: &mut CommandContext<'_>, command: &Command) -> Result<Value> {
    let args = command.args().iter().map(Value::to_string).collect();
    ctx.client_message(None, args)?;
    Ok(Value::None)
}

fn script_message_to(ctx: &mut CommandContext<'_>, command: &Command) -> Result<Value> {
    let target = command.str_arg(0, "target")?.to_string();
    let args = command.args().iter().skip(1).map(Value::to_string).collect();
    ctx.client_message(Some(&target), args)?;
    Ok(Value::None)
}

fn quit(ctx: &mut CommandContext<'_>, _: &Command) -> Result<Value> {
    ctx.log(LogLevel::V, "cplayer", "quit requested");
    ctx.quit();
    Ok(Value::None)
}
