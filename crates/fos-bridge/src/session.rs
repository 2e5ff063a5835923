//! Sessions
//!
//! A [`Session`] owns one engine runtime and context, the handle registry
//! and the function stash. Every entry point takes the session lock, unless
//! the calling thread is already running inside the same session (a host
//! function calling back into script), in which case the active engine
//! context is reused.

use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use indexmap::IndexMap;
use rquickjs::{qjs, Context, Ctx, Function, Runtime, Value};

use crate::codec::{caught, decode, encode};
use crate::config::SessionConfig;
use crate::console;
use crate::convert::IntoHost;
use crate::error::{BridgeError, BridgeResult};
use crate::proxy::{self, Prelude};
use crate::registry::HandleRegistry;
use crate::scope;
use crate::script::{resolve_global, FromResults, FunctionSlot, IntoArgs, ScriptFn, ScriptFunction};
use crate::stash::{FunctionStash, StashedFunction};
use crate::value::HostValue;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Globals installed before an evaluation, in insertion order.
pub type Globals = IndexMap<String, HostValue>;

/// Per-session state reachable from engine callbacks.
pub(crate) struct Bridge {
    pub session_id: u64,
    pub session: Weak<SessionCore>,
    pub registry: Arc<HandleRegistry>,
    pub stash: FunctionStash,
    prelude: Mutex<Option<Prelude>>,
}

impl Bridge {
    fn new(session_id: u64, session: Weak<SessionCore>) -> Self {
        Self {
            session_id,
            session,
            registry: HandleRegistry::new(),
            stash: FunctionStash::new(),
            prelude: Mutex::new(None),
        }
    }

    /// Restore one of the prelude helpers into `ctx`.
    pub fn prelude_fn<'js>(
        &self,
        ctx: &Ctx<'js>,
        pick: fn(&Prelude) -> &StashedFunction,
    ) -> BridgeResult<Function<'js>> {
        let persisted = {
            let prelude = self.prelude.lock().unwrap_or_else(PoisonError::into_inner);
            prelude.as_ref().map(pick).cloned()
        };
        let persisted = persisted.ok_or(BridgeError::SessionClosed)?;
        Ok(persisted.restore(ctx)?)
    }

    /// Free script functions whose last host reference is gone. Must run
    /// with the engine lock held.
    fn release_pending(&self) {
        let released = self.stash.drain_pending();
        if !released.is_empty() {
            tracing::trace!(count = released.len(), "released script functions");
        }
    }

    /// Drop everything that refers into the engine. Must run with the engine
    /// lock held, before the runtime goes away.
    fn teardown(&self) {
        self.registry.clear();
        drop(self.stash.clear());
        drop(self.prelude.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}

pub(crate) struct SessionCore {
    id: u64,
    lock: Mutex<()>,
    pub bridge: Arc<Bridge>,
    config: SessionConfig,
    context: Context,
    runtime: Runtime,
}

impl SessionCore {
    /// Run `f` inside the engine.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> R + Send,
        R: Send,
    {
        let f = match scope::with_active(self.id, f) {
            Ok(result) => return result,
            Err(f) => f,
        };

        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.context.with(|ctx| {
            let _scope = scope::enter(self.id, &ctx);
            self.bridge.release_pending();
            f(&ctx)
        })
    }

    fn install(&self) -> BridgeResult<()> {
        let bridge = Arc::downgrade(&self.bridge);
        let console = self.config.console;
        self.enter(|ctx| {
            let prelude = proxy::install(ctx, bridge.clone())
                .map_err(|err| BridgeError::EngineInit(err.to_string()))?;
            *self.bridge.prelude.lock().unwrap_or_else(PoisonError::into_inner) = Some(prelude);

            if console {
                console::install_console(ctx, bridge)
                    .map_err(|err| BridgeError::EngineInit(err.to_string()))?;
            }
            Ok(())
        })
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let bridge = &self.bridge;
        self.context.with(|_ctx| bridge.teardown());
        tracing::info!(session = self.id, "session closed");
    }
}

/// Evaluate `source` as a global script named `name`.
fn eval_unit<'js>(ctx: &Ctx<'js>, source: &str, name: &str, strict: bool) -> rquickjs::Result<Value<'js>> {
    // The engine wants a NUL after the last byte even though it gets a length.
    let mut input = Vec::with_capacity(source.len() + 1);
    input.extend_from_slice(source.as_bytes());
    input.push(0);
    let file_name = CString::new(name.replace('\0', "")).unwrap_or_default();

    let mut flags = qjs::JS_EVAL_TYPE_GLOBAL as i32;
    if strict {
        flags |= qjs::JS_EVAL_FLAG_STRICT as i32;
    }

    // SAFETY: `ctx` is a live context entered by this thread, `input` is
    // NUL-terminated past `source.len()` and `file_name` is a C string. Both
    // outlive the call. The returned value is owned and handed to
    // `Value::from_raw` exactly once; the exception marker is not refcounted.
    unsafe {
        let value = qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            input.as_ptr().cast(),
            source.len() as _,
            file_name.as_ptr(),
            flags,
        );
        if qjs::JS_IsException(value) {
            return Err(rquickjs::Error::Exception);
        }
        Ok(Value::from_raw(ctx.clone(), value))
    }
}

/// An embedded script engine with a host value bridge.
///
/// Cloning a session shares it; the engine is torn down when the last clone
/// and the last [`ScriptFunction`] call in flight are gone. A host function
/// that needs to call back into its session should capture a
/// [`WeakSession`]: a captured `Session` keeps the engine alive through its
/// own registry and is never torn down.
#[derive(Clone)]
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    /// Create a session with the default configuration.
    pub fn new() -> BridgeResult<Self> {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> BridgeResult<Self> {
        let runtime = Runtime::new().map_err(|err| BridgeError::EngineInit(err.to_string()))?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = config.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        let context = Context::full(&runtime).map_err(|err| BridgeError::EngineInit(err.to_string()))?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let core = Arc::new_cyclic(|session| SessionCore {
            id,
            lock: Mutex::new(()),
            bridge: Arc::new(Bridge::new(id, session.clone())),
            config,
            context,
            runtime,
        });
        core.install()?;

        tracing::info!(session = id, "session created");
        Ok(Self { core })
    }

    /// A handle that does not keep the session alive.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Process-unique session identifier.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Install `globals` (nil entries are skipped), evaluate `source` and
    /// decode its completion value.
    ///
    /// `name` is the compilation unit's file name, as it appears in stack
    /// traces and syntax errors.
    pub fn evaluate(&self, source: &str, name: &str, globals: &Globals) -> BridgeResult<HostValue> {
        let span = tracing::debug_span!("evaluate", session = self.core.id, unit = name);
        let _entered = span.enter();
        let strict = self.core.config.strict;

        let result = self.core.enter(|ctx| {
            let bridge = &self.core.bridge;
            let global = ctx.globals();
            for (key, value) in globals {
                if value.is_nil() {
                    continue;
                }
                let value = encode(bridge, ctx, value.clone())?;
                global.set(key.as_str(), value).map_err(|err| caught(ctx, err))?;
            }

            let result = eval_unit(ctx, source, name, strict).map_err(|err| caught(ctx, err))?;
            decode(bridge, ctx, result)
        });
        if let Err(err) = &result {
            tracing::debug!(error = %err, "evaluation failed");
        }
        result
    }

    /// Evaluate `source` with no extra globals.
    pub fn eval(&self, source: &str) -> BridgeResult<HostValue> {
        self.evaluate(source, "<eval>", &Globals::new())
    }

    pub fn set_global(&self, name: &str, value: impl IntoHost) -> BridgeResult<()> {
        let value = value.into_host();
        self.core.enter(|ctx| {
            let value = encode(&self.core.bridge, ctx, value)?;
            ctx.globals()
                .set(name, value)
                .map_err(|err| caught(ctx, err))
        })
    }

    /// Current value of a global; `Nil` when it is not defined.
    pub fn get_global(&self, name: &str) -> BridgeResult<HostValue> {
        self.core.enter(|ctx| {
            let value: Value = ctx.globals().get(name).map_err(|err| caught(ctx, err))?;
            decode(&self.core.bridge, ctx, value)
        })
    }

    /// Call the global function `name`.
    pub fn call_function(&self, name: &str, args: Vec<HostValue>) -> BridgeResult<HostValue> {
        ScriptFunction::global(&self.core, name).call(args)
    }

    /// Handle on the global function `name`, resolved again on every call.
    ///
    /// Fails when `name` is not a function right now.
    pub fn script_function(&self, name: &str) -> BridgeResult<ScriptFunction> {
        self.core.enter(|ctx| resolve_global(ctx, name).map(|_| ()))?;
        Ok(ScriptFunction::global(&self.core, name))
    }

    /// Typed handle on the global function `name`.
    pub fn function<Args: IntoArgs, R: FromResults>(&self, name: &str) -> BridgeResult<ScriptFn<Args, R>> {
        self.script_function(name).map(ScriptFn::new)
    }

    /// Point `slot` at the global function `name`.
    pub fn bind(&self, name: &str, slot: &mut dyn FunctionSlot) -> BridgeResult<()> {
        let function = self.script_function(name)?;
        slot.fill(function);
        tracing::debug!(session = self.core.id, function = name, "bound script function");
        Ok(())
    }

    /// [`Session::bind`] each entry, stopping at the first failure.
    pub fn bind_many<'a, I>(&self, slots: I) -> BridgeResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a mut dyn FunctionSlot)>,
    {
        for (name, slot) in slots {
            self.bind(name, slot)?;
        }
        Ok(())
    }

    /// Run a full garbage collection. Proxies collected here release their
    /// handles. Does nothing when called from inside this session.
    pub fn run_gc(&self) {
        if scope::is_active(self.core.id) {
            return;
        }
        let _lock = self.core.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.core.runtime.run_gc();
        let bridge = &self.core.bridge;
        self.core.context.with(|_ctx| bridge.release_pending());
    }

    /// Number of live registry handles.
    pub fn handle_count(&self) -> usize {
        self.core.bridge.registry.len()
    }

    /// Number of script functions retained for the host.
    pub fn retained_functions(&self) -> usize {
        self.core.bridge.stash.len()
    }
}

/// Non-owning [`Session`] handle, see [`Session::downgrade`].
#[derive(Clone)]
pub struct WeakSession {
    core: Weak<SessionCore>,
}

impl WeakSession {
    /// The session, if any strong handle to it is still alive.
    pub fn upgrade(&self) -> Option<Session> {
        self.core.upgrade().map(|core| Session { core })
    }
}

/// Evaluate `source` in a fresh session with the default configuration.
pub fn eval(source: &str) -> BridgeResult<HostValue> {
    Session::new()?.eval(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = Session::with_config(SessionConfig::bare()).unwrap();
        let b = Session::with_config(SessionConfig::bare()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_console_installed_by_config() {
        let with_console = Session::new().unwrap();
        assert_eq!(
            with_console.eval("typeof console.log").unwrap(),
            HostValue::String("function".into())
        );

        let bare = Session::with_config(SessionConfig::bare()).unwrap();
        assert_eq!(
            bare.eval("typeof print").unwrap(),
            HostValue::String("undefined".into())
        );
    }

    #[test]
    fn test_strict_config() {
        let config = SessionConfig {
            strict: true,
            ..SessionConfig::bare()
        };
        let session = Session::with_config(config).unwrap();
        let err = session.eval("undeclared = 1").unwrap_err();
        assert!(err.as_script().is_some());
    }

    #[test]
    fn test_session_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Session>();
        assert_send_sync::<WeakSession>();
        assert_send_sync::<Bridge>();
        assert_send_sync::<HostValue>();
        assert_send_sync::<ScriptFunction>();
    }

    #[test]
    fn test_weak_session_upgrade() {
        let session = Session::with_config(SessionConfig::bare()).unwrap();
        let weak = session.downgrade();
        assert_eq!(weak.upgrade().map(|s| s.id()), Some(session.id()));

        drop(session);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_strict_flag_applies_to_named_unit() {
        let config = SessionConfig {
            strict: true,
            ..SessionConfig::bare()
        };
        let session = Session::with_config(config).unwrap();
        let globals = Globals::new();
        let code = "(function () { return typeof this })()";
        assert_eq!(
            session.evaluate(code, "strict.js", &globals).unwrap().as_str(),
            Some("undefined")
        );

        let loose = Session::with_config(SessionConfig::bare()).unwrap();
        assert_eq!(
            loose.evaluate(code, "loose.js", &globals).unwrap().as_str(),
            Some("object")
        );
    }

    #[test]
    fn test_crate_level_eval() {
        assert_eq!(eval("6 * 7").unwrap(), HostValue::Int(42));
    }
}
