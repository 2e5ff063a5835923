//! Script functions seen from the host
//!
//! A [`ScriptFunction`] is an untyped handle on a script function: either a
//! global resolved by name on every call, or a function value retained in
//! the session's stash. [`ScriptFn`] layers a host signature on top.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use rquickjs::function::Rest as JsRest;
use rquickjs::{Ctx, Function, Value};

use crate::codec::{caught, decode, encode};
use crate::convert::{FromHost, IntoHost};
use crate::error::{BridgeError, BridgeResult, unrecoverable};
use crate::function::Rest;
use crate::session::{Bridge, SessionCore};
use crate::stash::{StashKey, StashedFunction};
use crate::value::HostValue;

enum Target {
    /// Global name, resolved on every call
    Global(String),
    /// Function value retained in the stash
    Stashed(StashKey),
}

struct Inner {
    session: Weak<SessionCore>,
    bridge: Weak<Bridge>,
    session_id: u64,
    target: Target,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Target::Stashed(key) = self.target {
            if let Some(bridge) = self.bridge.upgrade() {
                bridge.stash.schedule_release(key);
            }
        }
    }
}

/// A script function callable from the host.
#[derive(Clone)]
pub struct ScriptFunction {
    inner: Arc<Inner>,
}

impl ScriptFunction {
    pub(crate) fn global(core: &Arc<SessionCore>, name: &str) -> Self {
        Self::with_target(&core.bridge, Target::Global(name.to_string()))
    }

    /// Retain `function` in the session stash.
    pub(crate) fn stash<'js>(bridge: &Arc<Bridge>, ctx: &Ctx<'js>, function: Function<'js>) -> Self {
        let key = bridge.stash.insert(StashedFunction::save(ctx, function));
        Self::with_target(bridge, Target::Stashed(key))
    }

    fn with_target(bridge: &Arc<Bridge>, target: Target) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: bridge.session.clone(),
                bridge: Arc::downgrade(bridge),
                session_id: bridge.session_id,
                target,
            }),
        }
    }

    /// Global name this function is bound to, if any.
    pub fn name(&self) -> Option<&str> {
        match &self.inner.target {
            Target::Global(name) => Some(name),
            Target::Stashed(_) => None,
        }
    }

    pub(crate) fn session_id(&self) -> u64 {
        self.inner.session_id
    }

    /// The engine function this handle refers to right now.
    pub(crate) fn resolve<'js>(&self, bridge: &Bridge, ctx: &Ctx<'js>) -> BridgeResult<Function<'js>> {
        match &self.inner.target {
            Target::Global(name) => resolve_global(ctx, name),
            Target::Stashed(key) => {
                let persisted = bridge.stash.get(*key).ok_or(BridgeError::SessionClosed)?;
                Ok(persisted.restore(ctx)?)
            }
        }
    }

    /// Call the function with `this` undefined.
    ///
    /// Arguments that cannot be encoded are passed as `undefined`.
    pub fn call(&self, args: Vec<HostValue>) -> BridgeResult<HostValue> {
        let core = self.inner.session.upgrade().ok_or(BridgeError::SessionClosed)?;
        core.enter(|ctx| {
            let bridge = &core.bridge;
            let function = self.resolve(bridge, ctx)?;

            let args: Vec<Value> = args
                .into_iter()
                .map(|arg| {
                    encode(bridge, ctx, arg).unwrap_or_else(|err| {
                        tracing::debug!(error = %err, "argument encoded as undefined");
                        Value::new_undefined(ctx.clone())
                    })
                })
                .collect();

            let result: Value = function
                .call((JsRest(args),))
                .map_err(|err| caught(ctx, err))?;
            decode(bridge, ctx, result)
        })
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.target {
            Target::Global(name) => write!(f, "ScriptFunction({name})"),
            Target::Stashed(key) => write!(f, "ScriptFunction(#{}.{})", key.index, key.generation),
        }
    }
}

/// Look up a global function by name.
pub(crate) fn resolve_global<'js>(ctx: &Ctx<'js>, name: &str) -> BridgeResult<Function<'js>> {
    let value: Value = ctx.globals().get(name).map_err(|err| caught(ctx, err))?;
    if value.is_undefined() {
        return Err(BridgeError::NotFound(name.to_string()));
    }
    value
        .into_function()
        .ok_or_else(|| BridgeError::NotCallable(name.to_string()))
}

// ============================================================================
// Typed bindings
// ============================================================================

/// A script function with a host signature.
///
/// `Args` is a tuple of argument types, optionally ending in [`Rest`].
/// `R` describes the results (see [`FromResults`]). When `R` has no error
/// slot, a script failure cannot be reported and the call panics with an
/// "unrecoverable bridge fault"; declare `R` as `Result<_, BridgeError>` for
/// any function that may throw.
pub struct ScriptFn<Args, R> {
    function: ScriptFunction,
    _signature: PhantomData<fn(Args) -> R>,
}

impl<Args, R> ScriptFn<Args, R> {
    pub fn new(function: ScriptFunction) -> Self {
        Self {
            function,
            _signature: PhantomData,
        }
    }

    pub fn function(&self) -> &ScriptFunction {
        &self.function
    }
}

impl<Args: IntoArgs, R: FromResults> ScriptFn<Args, R> {
    pub fn call(&self, args: Args) -> R {
        R::from_results(self.function.call(args.into_args()))
    }
}

impl<Args, R> Clone for ScriptFn<Args, R> {
    fn clone(&self) -> Self {
        Self::new(self.function.clone())
    }
}

impl<Args, R> fmt::Debug for ScriptFn<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScriptFn").field(&self.function).finish()
    }
}

impl<Args, R> FromHost for ScriptFn<Args, R> {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        ScriptFunction::from_host(value).map(Self::new)
    }
}

impl<Args, R> IntoHost for ScriptFn<Args, R> {
    fn into_host(self) -> HostValue {
        HostValue::Script(self.function)
    }
}

/// A host variable that [`Session::bind`](crate::Session::bind) can fill.
pub trait FunctionSlot {
    fn fill(&mut self, function: ScriptFunction);
}

impl<Args, R> FunctionSlot for Option<ScriptFn<Args, R>> {
    fn fill(&mut self, function: ScriptFunction) {
        *self = Some(ScriptFn::new(function));
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Positional arguments of a script call.
pub trait IntoArgs {
    fn into_args(self) -> Vec<HostValue>;
}

/// One argument position. [`Rest`] expands into one argument per element.
pub trait IntoArg {
    fn push_into(self, args: &mut Vec<HostValue>);
}

impl<T: IntoHost> IntoArg for T {
    fn push_into(self, args: &mut Vec<HostValue>) {
        args.push(self.into_host());
    }
}

impl<T: IntoHost> IntoArg for Rest<T> {
    fn push_into(self, args: &mut Vec<HostValue>) {
        args.extend(self.0.into_iter().map(IntoHost::into_host));
    }
}

impl IntoArgs for Vec<HostValue> {
    fn into_args(self) -> Vec<HostValue> {
        self
    }
}

macro_rules! impl_into_args {
    ($($T:ident),*) => {
        impl<$($T: IntoArg),*> IntoArgs for ($($T,)*) {
            #[allow(non_snake_case, unused_mut)]
            fn into_args(self) -> Vec<HostValue> {
                let ($($T,)*) = self;
                let mut args = Vec::new();
                $($T.push_into(&mut args);)*
                args
            }
        }
    };
}

impl_into_args!();
impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
impl_into_args!(A, B, C, D, E);
impl_into_args!(A, B, C, D, E, G);

// ============================================================================
// Results
// ============================================================================

/// Host-side results of a script call.
///
/// - `()` ignores the result
/// - a single [`FromHost`] type takes the whole result
/// - a tuple takes one element of an array result per slot, zero-filled,
///   or the whole result in its first slot when it is not an array
/// - `Result<T, BridgeError>` is the error slot
pub trait FromResults: Sized {
    fn from_result(value: HostValue) -> BridgeResult<Self>;

    fn from_results(result: BridgeResult<HostValue>) -> Self {
        match result.and_then(Self::from_result) {
            Ok(value) => value,
            Err(err) => unrecoverable(err),
        }
    }
}

impl FromResults for () {
    fn from_result(_value: HostValue) -> BridgeResult<Self> {
        Ok(())
    }
}

impl<T: FromHost> FromResults for T {
    fn from_result(value: HostValue) -> BridgeResult<Self> {
        T::from_host(value)
    }
}

impl<T: FromResults> FromResults for Result<T, BridgeError> {
    fn from_result(value: HostValue) -> BridgeResult<Self> {
        Ok(T::from_result(value))
    }

    fn from_results(result: BridgeResult<HostValue>) -> Self {
        result.and_then(T::from_result)
    }
}

/// Split a result into `n` slots.
fn slots(value: HostValue, n: usize) -> Vec<HostValue> {
    let mut slots = match value {
        HostValue::List(items) => items,
        other => vec![other],
    };
    slots.resize(n, HostValue::Nil);
    slots
}

macro_rules! impl_from_results_tuple {
    ($($T:ident),+) => {
        impl<$($T: FromHost),+> FromResults for ($($T,)+) {
            #[allow(non_snake_case)]
            fn from_result(value: HostValue) -> BridgeResult<Self> {
                let mut slots = slots(value, count!($($T)+)).into_iter();
                $(let $T = $T::from_host(slots.next().unwrap_or_default())?;)+
                Ok(($($T,)+))
            }
        }
    };
}

impl_from_results_tuple!(A, B);
impl_from_results_tuple!(A, B, C);
impl_from_results_tuple!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_expands_in_place() {
        let args = (1i64, Rest(vec!["a", "b"])).into_args();
        assert_eq!(
            args,
            vec![
                HostValue::Int(1),
                HostValue::String("a".into()),
                HostValue::String("b".into()),
            ]
        );
        assert!(().into_args().is_empty());
    }

    #[test]
    fn test_single_slot_takes_whole_result() {
        let list = HostValue::List(vec![HostValue::Float(1.0), HostValue::Float(2.0)]);
        let whole = Vec::<f64>::from_result(list).unwrap();
        assert_eq!(whole, vec![1.0, 2.0]);
    }

    #[test]
    fn test_tuple_distributes_array() {
        let list = HostValue::List(vec![HostValue::Float(1.0), HostValue::String("x".into())]);
        let (n, s, extra): (i64, String, bool) = FromResults::from_result(list).unwrap();
        assert_eq!((n, s.as_str(), extra), (1, "x", false));
    }

    #[test]
    fn test_tuple_first_slot_for_scalar() {
        let (n, s): (f64, String) = FromResults::from_result(HostValue::Float(7.0)).unwrap();
        assert_eq!(n, 7.0);
        assert_eq!(s, "");
    }

    #[test]
    fn test_error_slot_carries_failure() {
        let failed: Result<f64, BridgeError> =
            FromResults::from_results(Err(BridgeError::NotFound("f".into())));
        assert_eq!(failed, Err(BridgeError::NotFound("f".into())));
    }

    #[test]
    #[should_panic(expected = "unrecoverable bridge fault")]
    fn test_missing_error_slot_is_fatal() {
        let _: f64 = FromResults::from_results(Err(BridgeError::NotFound("f".into())));
    }
}
