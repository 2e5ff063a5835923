//! Structural proxies
//!
//! Host composites reach script code as `Proxy` objects whose only state is
//! a registry handle. Property reads and writes are routed to the host value
//! by structural kind:
//!
//! | kind     | get                                   | set                        |
//! |----------|---------------------------------------|----------------------------|
//! | sequence | `length`, in-range indices            | in-range indices           |
//! | mapping  | any string key                        | any string key             |
//! | record   | fields, then methods (`count` → `Count`) | fields, addressable only |
//! | object   | methods (`close` → `Close`)           | never                      |
//!
//! Misses read as `undefined` and writes report failure without throwing.

use std::sync::{Arc, Weak};

use rquickjs::{Ctx, Function, Value};

use crate::codec::{caught, decode, encode};
use crate::error::BridgeResult;
use crate::registry::Handle;
use crate::session::Bridge;
use crate::stash::StashedFunction;
use crate::value::HostValue;

/// Engine-side helpers shared by every proxy of a session.
///
/// `wrap(handle, release)` builds a proxy; `release` is a host function
/// owning the proxy's handle reference, dropped when the proxy is collected.
/// `tag(fn, handle)` attaches a handle to a host function object.
/// `handleOf(value)` reads the handle back. Handles live in a private
/// `WeakMap` keyed by the exact object the bridge created, so they are not
/// reachable from script and are not inherited through prototypes.
const PRELUDE: &str = r#"
(function (hostGet, hostSet) {
    const handles = new WeakMap();

    function wrap(handle, release) {
        const proxy = new Proxy(Object.create(null), {
            release,
            get(target, key) {
                if (typeof key === "symbol") return undefined;
                return hostGet(handle, key);
            },
            set(target, key, value) {
                if (typeof key === "symbol") return false;
                return hostSet(handle, key, value);
            },
        });
        handles.set(proxy, handle);
        return proxy;
    }

    function handleOf(value) {
        return handles.get(value);
    }

    function tag(fn, handle) {
        handles.set(fn, handle);
        return fn;
    }

    return [wrap, handleOf, tag];
})
"#;

pub(crate) struct Prelude {
    pub wrap: StashedFunction,
    pub handle_of: StashedFunction,
    pub tag: StashedFunction,
}

/// Evaluate the prelude and keep its helpers alive.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, bridge: Weak<Bridge>) -> rquickjs::Result<Prelude> {
    let factory: Function = ctx.eval(PRELUDE)?;

    let get_bridge = bridge.clone();
    let host_get = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, handle: Handle, key: String| -> rquickjs::Result<Value<'js>> {
            match get_bridge.upgrade() {
                Some(bridge) => trap_get(&bridge, &ctx, handle, &key),
                None => Ok(Value::new_undefined(ctx)),
            }
        },
    )?;
    let host_set = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, handle: Handle, key: String, value: Value<'js>| -> bool {
            match bridge.upgrade() {
                Some(bridge) => trap_set(&bridge, &ctx, handle, &key, value),
                None => false,
            }
        },
    )?;

    let helpers: rquickjs::Array = factory.call((host_get, host_set))?;
    let wrap: Function = helpers.get(0)?;
    let handle_of: Function = helpers.get(1)?;
    let tag: Function = helpers.get(2)?;

    Ok(Prelude {
        wrap: StashedFunction::save(ctx, wrap),
        handle_of: StashedFunction::save(ctx, handle_of),
        tag: StashedFunction::save(ctx, tag),
    })
}

/// Register `value` and return a proxy for it.
pub(crate) fn wrap<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    value: HostValue,
) -> BridgeResult<Value<'js>> {
    let guard = bridge.registry.register(value);
    let handle = guard.handle();
    let release = Function::new(ctx.clone(), move || guard.handle())?;

    let wrap = bridge.prelude_fn(ctx, |prelude| &prelude.wrap)?;
    wrap.call((handle, release)).map_err(|err| caught(ctx, err))
}

/// Attach `handle` to a function object so that decoding it yields the host
/// value registered under that handle.
pub(crate) fn tag<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    function: Function<'js>,
    handle: Handle,
) -> BridgeResult<Value<'js>> {
    let tag = bridge.prelude_fn(ctx, |prelude| &prelude.tag)?;
    tag.call((function, handle)).map_err(|err| caught(ctx, err))
}

/// Handle carried by `value`, if it is a proxy or host function of this
/// session.
pub(crate) fn handle_of<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    value: &Value<'js>,
) -> BridgeResult<Option<Handle>> {
    let handle_of = bridge.prelude_fn(ctx, |prelude| &prelude.handle_of)?;
    let handle: Option<f64> = handle_of
        .call((value.clone(),))
        .map_err(|err| caught(ctx, err))?;
    Ok(handle.map(|h| h as Handle))
}

fn trap_get<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    handle: Handle,
    key: &str,
) -> rquickjs::Result<Value<'js>> {
    let found = bridge
        .registry
        .lookup(handle)
        .and_then(|target| property(&target, key));

    let Some(found) = found else {
        return Ok(Value::new_undefined(ctx.clone()));
    };
    match encode(bridge, ctx, found) {
        Ok(value) => Ok(value),
        Err(err) => {
            tracing::debug!(handle, key, error = %err, "proxy read dropped");
            Ok(Value::new_undefined(ctx.clone()))
        }
    }
}

fn property(target: &HostValue, key: &str) -> Option<HostValue> {
    match target {
        HostValue::Sequence(seq) => {
            if key == "length" {
                return Some(HostValue::Int(seq.len() as i64));
            }
            index(key).and_then(|i| seq.element(i))
        }
        HostValue::Mapping(map) => map.get(key),
        HostValue::Record(record) => {
            let name = upper_first(key);
            record
                .field(&name)
                .or_else(|| record.method(&name).map(HostValue::Function))
        }
        HostValue::Object(object) => object.method(&upper_first(key)).map(HostValue::Function),
        HostValue::Nil
        | HostValue::Bool(_)
        | HostValue::Int(_)
        | HostValue::UInt(_)
        | HostValue::Float(_)
        | HostValue::Bytes(_)
        | HostValue::String(_)
        | HostValue::List(_)
        | HostValue::Map(_)
        | HostValue::Function(_)
        | HostValue::Script(_)
        | HostValue::Opaque(_) => None,
    }
}

fn trap_set<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    handle: Handle,
    key: &str,
    value: Value<'js>,
) -> bool {
    let Some(target) = bridge.registry.lookup(handle) else {
        return false;
    };
    let value = match decode(bridge, ctx, value) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(handle, key, error = %err, "proxy write dropped");
            return false;
        }
    };

    let written = match &target {
        HostValue::Sequence(seq) => match index(key) {
            Some(i) => seq.set_element(i, value),
            None => Ok(false),
        },
        HostValue::Mapping(map) => map.insert(key, value).map(|()| true),
        HostValue::Record(record) => record.set_field(&upper_first(key), value),
        HostValue::Nil
        | HostValue::Bool(_)
        | HostValue::Int(_)
        | HostValue::UInt(_)
        | HostValue::Float(_)
        | HostValue::Bytes(_)
        | HostValue::String(_)
        | HostValue::List(_)
        | HostValue::Map(_)
        | HostValue::Object(_)
        | HostValue::Function(_)
        | HostValue::Script(_)
        | HostValue::Opaque(_) => Ok(false),
    };

    written.unwrap_or_else(|err| {
        tracing::debug!(handle, key, error = %err, "proxy write dropped");
        false
    })
}

/// Canonical array index: digits only, no leading zeros.
fn index(key: &str) -> Option<usize> {
    let i: usize = key.parse().ok()?;
    (i.to_string() == key).then_some(i)
}

/// Host field name for a script property name.
pub(crate) fn upper_first(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Shared;

    #[test]
    fn test_upper_first() {
        assert_eq!(upper_first("count"), "Count");
        assert_eq!(upper_first("Count"), "Count");
        assert_eq!(upper_first("éclair"), "Éclair");
        assert_eq!(upper_first(""), "");
    }

    #[test]
    fn test_index_is_canonical() {
        assert_eq!(index("0"), Some(0));
        assert_eq!(index("12"), Some(12));
        assert_eq!(index("-1"), None);
        assert_eq!(index("01"), None);
        assert_eq!(index("length"), None);
    }

    #[test]
    fn test_sequence_property() {
        let seq = HostValue::sequence(&Shared::new(vec![10i64, 20, 30]));

        assert_eq!(property(&seq, "length"), Some(HostValue::Int(3)));
        assert_eq!(property(&seq, "1"), Some(HostValue::Int(20)));
        assert_eq!(property(&seq, "3"), None);
        assert_eq!(property(&seq, "push"), None);
    }

    #[test]
    fn test_mapping_keys_keep_case() {
        let mut map = indexmap::IndexMap::new();
        map.insert("key".to_string(), "v".to_string());
        let mapping = HostValue::mapping(&Shared::new(map));

        assert_eq!(property(&mapping, "key"), Some(HostValue::String("v".into())));
        assert_eq!(property(&mapping, "Key"), None);
    }
}
