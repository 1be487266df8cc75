//! JSON <-> JavaScript value conversion

use rquickjs::{Array, Ctx, IntoJs, Object, Type, Value};

use crate::error::{JsError, JsResult};

/// Convert a JavaScript value to JSON.
///
/// `undefined`, functions, symbols and non-finite numbers become `null`.
pub fn js_to_json<'js>(value: Value<'js>) -> JsResult<serde_json::Value> {
    let conversion = |e: rquickjs::Error| JsError::Conversion(e.to_string());

    match value.type_of() {
        Type::Bool => Ok(serde_json::Value::Bool(value.get().map_err(conversion)?)),
        Type::Int => {
            let i: i32 = value.get().map_err(conversion)?;
            Ok(serde_json::Value::from(i))
        }
        Type::Float => {
            let f: f64 = value.get().map_err(conversion)?;
            Ok(serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null))
        }
        Type::String => Ok(serde_json::Value::String(value.get().map_err(conversion)?)),
        Type::Array => {
            let array: Array = value.get().map_err(conversion)?;
            let mut items = Vec::with_capacity(array.len());
            for item in array.iter::<Value>() {
                items.push(js_to_json(item.map_err(conversion)?)?);
            }
            Ok(serde_json::Value::Array(items))
        }
        Type::Object | Type::Exception => {
            let object: Object = value.get().map_err(conversion)?;
            let mut fields = serde_json::Map::new();
            for prop in object.props::<String, Value>() {
                let (key, val) = prop.map_err(conversion)?;
                if val.is_function() {
                    continue;
                }
                fields.insert(key, js_to_json(val)?);
            }
            Ok(serde_json::Value::Object(fields))
        }
        _ => Ok(serde_json::Value::Null),
    }
}

/// Convert JSON to a JavaScript value
pub fn json_to_js<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    match json {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Ok(Value::new_int(ctx.clone(), i)),
            None => Ok(Value::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN))),
        },
        serde_json::Value::String(s) => s.as_str().into_js(ctx),
        serde_json::Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        serde_json::Value::Object(fields) => {
            let object = Object::new(ctx.clone())?;
            for (key, val) in fields {
                object.set(key.as_str(), json_to_js(ctx, val)?)?;
            }
            Ok(object.into_value())
        }
    }
}
