//! JS Runtime Errors

use hotscript_types::ScriptException;
use rquickjs::{CaughtError, Context, Exception, Runtime, Value};

/// Errors raised by the embedding itself, as opposed to exceptions thrown
/// by script code
#[derive(Debug, thiserror::Error)]
pub enum JsError {
    #[error("Failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("Type conversion error: {0}")]
    Conversion(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] rquickjs::Error),
}

pub type JsResult<T> = Result<T, JsError>;

impl From<JsError> for ScriptException {
    fn from(err: JsError) -> Self {
        ScriptException::new(err.to_string(), "").with_name("InternalError")
    }
}

/// Fresh runtime with a full context
pub(crate) fn new_context() -> JsResult<(Runtime, Context)> {
    let runtime = Runtime::new().map_err(|e| JsError::RuntimeCreation(e.to_string()))?;
    let context = Context::full(&runtime).map_err(|e| JsError::RuntimeCreation(e.to_string()))?;
    Ok((runtime, context))
}

/// Turn whatever script code threw into a [`ScriptException`]
pub(crate) fn to_exception(caught: CaughtError<'_>) -> ScriptException {
    match caught {
        CaughtError::Exception(exception) => from_exception(&exception),
        CaughtError::Value(value) => from_value(value),
        CaughtError::Error(error) => ScriptException::new(error.to_string(), ""),
    }
}

/// A thrown or rejected value as a [`ScriptException`]
pub(crate) fn from_value(value: Value<'_>) -> ScriptException {
    if let Some(exception) = value.as_exception() {
        return from_exception(exception);
    }
    let message = value
        .get::<rquickjs::convert::Coerced<String>>()
        .map(|s| s.0)
        .unwrap_or_else(|_| format!("{:?}", value));
    ScriptException::new(format!("Uncaught {}", message), "")
}

fn from_exception(exception: &Exception<'_>) -> ScriptException {
    let name: Option<String> = exception
        .as_object()
        .get::<_, Option<String>>("name")
        .ok()
        .flatten();
    let exc = ScriptException::new(
        exception.message().unwrap_or_default(),
        exception.stack().unwrap_or_default(),
    );
    match name {
        Some(name) => exc.with_name(name),
        None => exc,
    }
}
