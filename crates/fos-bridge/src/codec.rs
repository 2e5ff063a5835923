//! Value codec
//!
//! `encode` turns a [`HostValue`] into an engine value, `decode` goes the
//! other way. Composite host values go into the engine as proxies backed by
//! a registry handle; composite engine values come out as detached copies.

use std::sync::Arc;

use indexmap::IndexMap;
use rquickjs::convert::Coerced;
use rquickjs::object::Filter;
use rquickjs::{Atom, Ctx, Value};

use crate::error::{BridgeError, BridgeResult, ScriptException};
use crate::function::{self, HostFunction};
use crate::proxy;
use crate::script::ScriptFunction;
use crate::session::Bridge;
use crate::shared::Shared;
use crate::value::HostValue;

/// Convert a host value into an engine value.
pub(crate) fn encode<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    value: HostValue,
) -> BridgeResult<Value<'js>> {
    let encoded = match value {
        HostValue::Nil => Value::new_null(ctx.clone()),
        HostValue::Bool(b) => Value::new_bool(ctx.clone(), b),
        HostValue::Int(i) => encode_int(ctx, i),
        HostValue::UInt(u) => match i64::try_from(u) {
            Ok(i) => encode_int(ctx, i),
            // Past i64::MAX the value only survives as a double.
            Err(_) => Value::new_float(ctx.clone(), u as f64),
        },
        HostValue::Float(f) => Value::new_float(ctx.clone(), f),
        HostValue::Bytes(bytes) => encode_str(ctx, &String::from_utf8_lossy(&bytes))?,
        HostValue::String(s) => encode_str(ctx, &s)?,
        HostValue::List(items) => proxy::wrap(bridge, ctx, HostValue::sequence(&Shared::new(items)))?,
        HostValue::Map(entries) => {
            proxy::wrap(bridge, ctx, HostValue::mapping(&Shared::new(entries)))?
        }
        value @ (HostValue::Sequence(_)
        | HostValue::Mapping(_)
        | HostValue::Record(_)
        | HostValue::Object(_)) => proxy::wrap(bridge, ctx, value)?,
        HostValue::Function(host) => function::expose(bridge, ctx, host)?,
        HostValue::Script(script) => encode_script(bridge, ctx, script)?,
        HostValue::Opaque(_) => {
            return Err(BridgeError::UnsupportedType("opaque host value".into()));
        }
    };
    Ok(encoded)
}

fn encode_int<'js>(ctx: &Ctx<'js>, i: i64) -> Value<'js> {
    match i32::try_from(i) {
        Ok(small) => Value::new_int(ctx.clone(), small),
        Err(_) => Value::new_float(ctx.clone(), i as f64),
    }
}

fn encode_str<'js>(ctx: &Ctx<'js>, s: &str) -> BridgeResult<Value<'js>> {
    Ok(rquickjs::String::from_str(ctx.clone(), s)?.into_value())
}

/// A script function returning to its own session is restored as-is; one
/// from another session is forwarded through a host function.
fn encode_script<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    script: ScriptFunction,
) -> BridgeResult<Value<'js>> {
    if script.session_id() == bridge.session_id {
        return Ok(script.resolve(bridge, ctx)?.into_value());
    }
    function::expose(bridge, ctx, HostFunction::forward(script))
}

/// Convert an engine value into a host value.
pub(crate) fn decode<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    value: Value<'js>,
) -> BridgeResult<HostValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(HostValue::Nil);
    }
    if let Some(b) = value.as_bool() {
        return Ok(HostValue::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(HostValue::Float(i as f64));
    }
    if let Some(f) = value.as_float() {
        return Ok(HostValue::Float(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(HostValue::String(s.to_string()?));
    }
    if value.is_array() {
        return decode_array(bridge, ctx, &value);
    }
    if value.is_function() || value.is_object() {
        if let Some(handle) = proxy::handle_of(bridge, ctx, &value)? {
            // A released handle reads as nil.
            return Ok(bridge.registry.lookup(handle).unwrap_or_default());
        }
    }
    if let Some(function) = value.clone().into_function() {
        return Ok(HostValue::Script(ScriptFunction::stash(bridge, ctx, function)));
    }
    if value.is_object() {
        return decode_object(bridge, ctx, &value);
    }

    Err(BridgeError::UnsupportedType(format!(
        "script {:?}",
        value.type_of()
    )))
}

/// Longest script array `decode` copies out. `length` is script-controlled
/// and sparse arrays cost nothing on the engine side.
const MAX_ARRAY_LEN: u32 = 1 << 24;

/// Upper bound on the up-front reservation for a decoded array.
const PREALLOCATE: u32 = 1024;

fn decode_array<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    value: &Value<'js>,
) -> BridgeResult<HostValue> {
    let Some(array) = value.as_object() else {
        return Err(BridgeError::UnsupportedType("script array".into()));
    };
    let len: f64 = array.get("length").map_err(|err| caught(ctx, err))?;
    let len = len as u32;
    if len > MAX_ARRAY_LEN {
        return Err(BridgeError::UnsupportedType(format!("script array of length {len}")));
    }

    // Holes read as undefined and decode to nil.
    let mut items = Vec::with_capacity(len.min(PREALLOCATE) as usize);
    for index in 0..len {
        let item: Value = array.get(index).map_err(|err| caught(ctx, err))?;
        items.push(decode(bridge, ctx, item)?);
    }
    Ok(HostValue::List(items))
}

fn decode_object<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    value: &Value<'js>,
) -> BridgeResult<HostValue> {
    let Some(object) = value.as_object() else {
        return Err(BridgeError::UnsupportedType("script object".into()));
    };

    let mut entries = IndexMap::new();
    let filter = Filter::new().string().symbol().enum_only();
    for key in object.own_keys::<Atom>(filter) {
        let key = key.map_err(|err| caught(ctx, err))?;
        let name = key.to_string()?;
        let item: Value = object.get(key).map_err(|err| caught(ctx, err))?;
        entries.insert(name, decode(bridge, ctx, item)?);
    }
    Ok(HostValue::Map(entries))
}

/// Turn an engine error into a bridge error, taking the pending exception
/// when there is one.
pub(crate) fn caught(ctx: &Ctx<'_>, err: rquickjs::Error) -> BridgeError {
    if !err.is_exception() {
        return err.into();
    }
    BridgeError::Script(exception_from(ctx.catch()))
}

fn exception_from(thrown: Value<'_>) -> ScriptException {
    let mut message = None;
    let mut stack = None;

    if let Some(object) = thrown.as_object() {
        if let Ok(value) = object.get::<_, Value>("message") {
            if !value.is_undefined() {
                message = coerce_string(&value);
            }
        }
        if let Ok(value) = object.get::<_, Value>("stack") {
            if !value.is_undefined() {
                stack = coerce_string(&value);
            }
        }
    }

    let message = message
        .or_else(|| coerce_string(&thrown))
        .unwrap_or_else(|| "unknown exception".to_string());
    ScriptException { message, stack }
}

fn coerce_string(value: &Value<'_>) -> Option<String> {
    value.get::<Coerced<String>>().ok().map(|coerced| coerced.0)
}
