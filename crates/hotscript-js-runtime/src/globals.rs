//! JavaScript Global Objects
//!
//! Everything a module sees besides the language built-ins: a `console` that
//! logs through `tracing`, and `getGlobalScriptingContext()`.

use std::sync::Arc;

use parking_lot::RwLock;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Result as JsResult, Value};

use crate::convert::json_to_js;

pub const CONSOLE_TARGET: &str = "hotscript.js.console";

/// Install the hotscript globals for the module of `script`
pub fn register_globals<'js>(
    ctx: &Ctx<'js>,
    script: &str,
    context: Arc<RwLock<serde_json::Value>>,
) -> JsResult<()> {
    register_console(ctx, script)?;

    let get_context = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> JsResult<Value<'js>> {
        json_to_js(&ctx, &context.read())
    })?;
    ctx.globals().set("getGlobalScriptingContext", get_context)?;

    Ok(())
}

fn join(args: Rest<Coerced<String>>) -> String {
    args.0.into_iter().map(|s| s.0).collect::<Vec<_>>().join(" ")
}

fn register_console(ctx: &Ctx<'_>, script: &str) -> JsResult<()> {
    let console = Object::new(ctx.clone())?;

    let name = script.to_string();
    console.set("log", Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        tracing::info!(target: CONSOLE_TARGET, script = %name, "{}", join(args));
    })?)?;

    let name = script.to_string();
    console.set("info", Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        tracing::info!(target: CONSOLE_TARGET, script = %name, "{}", join(args));
    })?)?;

    let name = script.to_string();
    console.set("warn", Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        tracing::warn!(target: CONSOLE_TARGET, script = %name, "{}", join(args));
    })?)?;

    let name = script.to_string();
    console.set("error", Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        tracing::error!(target: CONSOLE_TARGET, script = %name, "{}", join(args));
    })?)?;

    let name = script.to_string();
    console.set("debug", Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        tracing::debug!(target: CONSOLE_TARGET, script = %name, "{}", join(args));
    })?)?;

    ctx.globals().set("console", console)?;

    Ok(())
}
