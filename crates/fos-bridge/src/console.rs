//! Console API
//!
//! Installs `console.log`/`info`/`warn`/`error`/`debug` and a global `print`
//! into a session. Output goes to tracing under the `fos_bridge::console`
//! target so hosts control it through their subscriber.
//!
//! Host values reached through the bridge are described by what they are on
//! the host side (`Sequence(3)`, `Record(Counter)`, `HostFunction(add)`)
//! rather than by their proxy shape.

use std::fmt::Write;
use std::sync::{Arc, Weak};

use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};

use crate::proxy;
use crate::session::Bridge;
use crate::value::HostValue;

/// Arrays nested deeper than this print as `[Array]`.
const MAX_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

/// Install the console API into the global object
pub(crate) fn install_console(ctx: &Ctx<'_>, bridge: Weak<Bridge>) -> Result<(), rquickjs::Error> {
    let globals = ctx.globals();
    let console = Object::new(ctx.clone())?;

    for (name, level) in [
        ("log", Level::Log),
        ("info", Level::Info),
        ("warn", Level::Warn),
        ("error", Level::Error),
        ("debug", Level::Debug),
    ] {
        console.set(name, level_function(ctx, level, bridge.clone())?)?;
    }

    globals.set("console", console)?;
    globals.set("print", level_function(ctx, Level::Log, bridge)?)?;

    Ok(())
}

fn level_function<'js>(
    ctx: &Ctx<'js>,
    level: Level,
    bridge: Weak<Bridge>,
) -> Result<Function<'js>, rquickjs::Error> {
    Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        let bridge = bridge.upgrade();
        let line = format_args_line(bridge.as_ref(), &ctx, &args.0);
        log_with_level(level, &line);
        Ok::<(), rquickjs::Error>(())
    })
}

fn log_with_level(level: Level, line: &str) {
    match level {
        Level::Error => tracing::error!(target: "fos_bridge::console", "[JS] {}", line),
        Level::Warn => tracing::warn!(target: "fos_bridge::console", "[JS] {}", line),
        Level::Debug => tracing::debug!(target: "fos_bridge::console", "[JS] {}", line),
        Level::Log | Level::Info => tracing::info!(target: "fos_bridge::console", "[JS] {}", line),
    }
}

fn format_args_line<'js>(bridge: Option<&Arc<Bridge>>, ctx: &Ctx<'js>, values: &[Value<'js>]) -> String {
    let mut line = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        format_value(&mut line, bridge, ctx, value, 0);
    }
    line
}

fn format_value<'js>(
    out: &mut String,
    bridge: Option<&Arc<Bridge>>,
    ctx: &Ctx<'js>,
    value: &Value<'js>,
    depth: usize,
) {
    if value.is_undefined() {
        out.push_str("undefined");
        return;
    }
    if value.is_null() {
        out.push_str("null");
        return;
    }
    if let Some(b) = value.as_bool() {
        write!(out, "{b}").ok();
        return;
    }
    if let Some(n) = value.as_int() {
        write!(out, "{n}").ok();
        return;
    }
    if let Some(n) = value.as_float() {
        write!(out, "{n}").ok();
        return;
    }
    if let Some(s) = value.as_string() {
        out.push_str(&s.to_string().unwrap_or_default());
        return;
    }

    if let Some(host) = bridge.and_then(|bridge| host_value(bridge, ctx, value)) {
        out.push_str(&describe(&host));
        return;
    }

    if let Some(array) = value.as_array() {
        if depth >= MAX_DEPTH {
            out.push_str("[Array]");
            return;
        }
        out.push('[');
        for (i, item) in array.iter::<Value>().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match item {
                Ok(item) => format_value(out, bridge, ctx, &item, depth + 1),
                Err(_) => out.push('?'),
            }
        }
        out.push(']');
    } else if let Some(function) = value.as_function() {
        let name: String = function.get("name").unwrap_or_default();
        if name.is_empty() {
            out.push_str("[Function]");
        } else {
            write!(out, "[Function {name}]").ok();
        }
    } else if value.is_object() {
        out.push_str("[Object]");
    } else {
        write!(out, "[{:?}]", value.type_of()).ok();
    }
}

/// The host value behind a proxy or host function of this session.
fn host_value<'js>(bridge: &Arc<Bridge>, ctx: &Ctx<'js>, value: &Value<'js>) -> Option<HostValue> {
    if !value.is_object() && !value.is_function() {
        return None;
    }
    let handle = proxy::handle_of(bridge, ctx, value).ok().flatten()?;
    bridge.registry.lookup(handle)
}

/// One-word host-side description of a bridged value.
fn describe(value: &HostValue) -> String {
    match value {
        HostValue::Sequence(seq) => format!("Sequence({})", seq.len()),
        HostValue::Mapping(map) => format!("Mapping({})", map.len()),
        HostValue::Record(record) => format!("Record({})", short_type_name(record.type_name())),
        HostValue::Object(object) => format!("Object({})", short_type_name(object.type_name())),
        HostValue::Function(function) if function.name().is_empty() => "HostFunction".to_string(),
        HostValue::Function(function) => format!("HostFunction({})", function.name()),
        other => other.kind().name().to_string(),
    }
}

/// `my_crate::model::Counter<T>` → `Counter`
fn short_type_name(name: &str) -> &str {
    let path = name.split('<').next().unwrap_or(name);
    path.rsplit("::").next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::HostFunction;
    use crate::shared::{HostRecord, Shared};
    use rquickjs::{Context, Runtime};

    fn with_console(f: impl for<'js> FnOnce(&Ctx<'js>)) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            install_console(&ctx, Weak::new()).unwrap();
            f(&ctx)
        });
    }

    #[test]
    fn test_console_levels() {
        with_console(|ctx| {
            let _: Value = ctx
                .eval("console.log('log'); console.info('info'); console.warn('warn'); console.error('error'); console.debug('debug')")
                .unwrap();
        });
    }

    #[test]
    fn test_print_is_global() {
        with_console(|ctx| {
            let kind: String = ctx.eval("typeof print").unwrap();
            assert_eq!(kind, "function");
            let _: Value = ctx.eval("print('Hello', 42, true)").unwrap();
        });
    }

    #[test]
    fn test_format_line() {
        with_console(|ctx| {
            let values: Vec<Value> = vec![
                ctx.eval("'a'").unwrap(),
                ctx.eval("1").unwrap(),
                ctx.eval("2.5").unwrap(),
                ctx.eval("null").unwrap(),
                ctx.eval("[1, 'b', [2, [3]]]").unwrap(),
                ctx.eval("({})").unwrap(),
                ctx.eval("(function named() {})").unwrap(),
                ctx.eval("() => {}").unwrap(),
            ];
            assert_eq!(
                format_args_line(None, ctx, &values),
                "a 1 2.5 null [1, b, [2, [Array]]] [Object] [Function named] [Function]"
            );
        });
    }

    struct Counter;

    impl HostRecord for Counter {
        fn field(&self, _name: &str) -> Option<HostValue> {
            None
        }

        fn set_field(&mut self, _name: &str, _value: HostValue) -> crate::error::BridgeResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_describe_host_values() {
        assert_eq!(describe(&HostValue::sequence(&Shared::new(vec![1i64, 2, 3]))), "Sequence(3)");
        assert_eq!(describe(&HostValue::record(&Shared::new(Counter))), "Record(Counter)");
        assert_eq!(
            describe(&HostValue::Function(HostFunction::new(|| 1i64).with_name("one"))),
            "HostFunction(one)"
        );
        assert_eq!(short_type_name("alloc::vec::Vec<i64>"), "Vec");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
