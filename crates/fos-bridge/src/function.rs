//! Host functions
//!
//! A [`HostFunction`] is a host closure packaged once, at construction, with
//! its arity, its variadic flag and the per-parameter conversions. Script
//! code calls it like any other function:
//!
//! ```ignore
//! let add = HostFunction::new(|a: i64, b: i64| a + b);
//! let sum = HostFunction::variadic(|first: i64, Rest(rest): Rest<i64>| {
//!     first + rest.iter().sum::<i64>()
//! });
//! let checked = HostFunction::new(|x: f64| -> Result<f64, String> {
//!     if x < 0.0 { Err("negative".into()) } else { Ok(x.sqrt()) }
//! });
//! ```
//!
//! Return values follow [`IntoReturns`]: `()` returns nothing, one value
//! returns that value, a tuple returns a script array, and a trailing
//! `Result` error becomes a script exception.

use std::fmt;
use std::sync::Arc;

use rquickjs::function::Rest as JsRest;
use rquickjs::{Array, Ctx, Exception, Function, Value};

use crate::codec::{decode, encode};
use crate::convert::{FromHost, IntoHost};
use crate::error::{BridgeError, BridgeResult};
use crate::proxy;
use crate::scope;
use crate::script::ScriptFunction;
use crate::session::Bridge;
use crate::value::HostValue;

type Callback = dyn Fn(Vec<HostValue>) -> BridgeResult<Vec<HostValue>> + Send + Sync;

/// Variadic tail of a host function's parameters or of script call
/// arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rest<T>(pub Vec<T>);

struct Inner {
    arity: usize,
    variadic: bool,
    callback: Box<Callback>,
}

/// A host function callable from script code.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    inner: Arc<Inner>,
}

impl HostFunction {
    /// Wrap a closure with a fixed number of parameters.
    pub fn new<P, F: IntoHostFunction<P>>(function: F) -> Self {
        function.into_host_function()
    }

    /// Wrap a closure whose last parameter is a [`Rest`] tail.
    pub fn variadic<P, F: IntoVariadicFunction<P>>(function: F) -> Self {
        function.into_variadic_function()
    }

    /// Wrap a closure over raw host values. `arity` counts the fixed
    /// parameters; a variadic function accepts any number beyond that.
    pub fn from_fn<F>(arity: usize, variadic: bool, callback: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> BridgeResult<Vec<HostValue>> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(""),
            inner: Arc::new(Inner {
                arity,
                variadic,
                callback: Box::new(callback),
            }),
        }
    }

    /// Set the `name` script code sees on the function.
    pub fn with_name(mut self, name: impl AsRef<str>) -> Self {
        self.name = Arc::from(name.as_ref());
        self
    }

    /// Host function that calls a script function.
    pub(crate) fn forward(script: ScriptFunction) -> Self {
        Self::from_fn(0, true, move |args| Ok(vec![script.call(args)?]))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of fixed parameters.
    pub fn arity(&self) -> usize {
        self.inner.arity
    }

    pub fn is_variadic(&self) -> bool {
        self.inner.variadic
    }

    /// Check an argument count against the declared arity.
    pub fn check_arity(&self, got: usize) -> BridgeResult<()> {
        let expected = self.inner.arity;
        let variadic = self.inner.variadic;
        let accepted = if variadic { got >= expected } else { got == expected };
        if accepted {
            Ok(())
        } else {
            Err(BridgeError::ArityMismatch {
                expected,
                variadic,
                got,
            })
        }
    }

    /// Call the function directly from the host.
    pub fn call(&self, args: Vec<HostValue>) -> BridgeResult<Vec<HostValue>> {
        self.check_arity(args.len())?;
        (self.inner.callback)(args)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("arity", &self.inner.arity)
            .field("variadic", &self.inner.variadic)
            .finish()
    }
}

// ============================================================================
// Script exposure
// ============================================================================

/// Build the script function object for `function`.
pub(crate) fn expose<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    function: HostFunction,
) -> BridgeResult<Value<'js>> {
    let name = function.name().to_string();
    let arity = function.arity();
    let guard = bridge.registry.register(HostValue::Function(function));
    let handle = guard.handle();
    let weak = Arc::downgrade(bridge);

    let js = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: JsRest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let handle = guard.handle();
            let bridge = weak.upgrade();
            let function = bridge
                .as_ref()
                .and_then(|bridge| bridge.registry.lookup(handle));
            match (bridge, function) {
                (Some(bridge), Some(HostValue::Function(function))) => {
                    invoke(&bridge, &ctx, &function, args.0)
                }
                _ => Ok(Value::new_undefined(ctx)),
            }
        },
    )?;
    js.set_name(&name)?;
    js.set_length(arity)?;

    proxy::tag(bridge, ctx, js, handle)
}

/// Run a host function on behalf of script code.
fn invoke<'js>(
    bridge: &Arc<Bridge>,
    ctx: &Ctx<'js>,
    function: &HostFunction,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let _scope = scope::enter(bridge.session_id, ctx);

    if let Err(err) = function.check_arity(args.len()) {
        return Err(Exception::throw_type(ctx, &err.to_string()));
    }

    let args = args
        .into_iter()
        .map(|arg| {
            decode(bridge, ctx, arg).unwrap_or_else(|err| {
                tracing::debug!(error = %err, "argument decoded as nil");
                HostValue::Nil
            })
        })
        .collect();

    let results = match (function.inner.callback)(args) {
        Ok(results) => results,
        Err(err) => return Err(Exception::throw_message(ctx, &err.to_string())),
    };

    match results.len() {
        0 => Ok(Value::new_undefined(ctx.clone())),
        1 => {
            let result = results.into_iter().next().unwrap_or_default();
            encode(bridge, ctx, result)
                .map_err(|err| Exception::throw_message(ctx, &err.to_string()))
        }
        n => {
            let array = Array::new(ctx.clone())?;
            for (i, result) in results.into_iter().enumerate() {
                let value = encode(bridge, ctx, result).unwrap_or_else(|err| {
                    tracing::debug!(slot = i, of = n, error = %err, "result encoded as null");
                    Value::new_null(ctx.clone())
                });
                array.set(i, value)?;
            }
            Ok(array.into_value())
        }
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// Closures convertible into a fixed-arity [`HostFunction`].
pub trait IntoHostFunction<Params>: Send + Sync + 'static {
    fn into_host_function(self) -> HostFunction;
}

/// Closures convertible into a variadic [`HostFunction`].
pub trait IntoVariadicFunction<Params>: Send + Sync + 'static {
    fn into_variadic_function(self) -> HostFunction;
}

/// Coerce one argument, falling back to the zero value of `T`.
fn coerce_arg<T: FromHost>(value: HostValue) -> BridgeResult<T> {
    T::from_host(value).or_else(|err| {
        tracing::debug!(error = %err, "argument coerced to zero value");
        T::from_host(HostValue::Nil)
    })
}

macro_rules! impl_into_host_function {
    ($($T:ident),*) => {
        impl<F, R, $($T,)*> IntoHostFunction<($($T,)*)> for F
        where
            F: Fn($($T),*) -> R + Send + Sync + 'static,
            R: IntoReturns,
            $($T: FromHost,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_host_function(self) -> HostFunction {
                HostFunction::from_fn(count!($($T)*), false, move |args| {
                    let mut args = args.into_iter();
                    $(let $T = coerce_arg::<$T>(args.next().unwrap_or_default())?;)*
                    (self)($($T),*).into_returns()
                })
            }
        }

        impl<F, R, $($T,)* V> IntoVariadicFunction<($($T,)* Rest<V>,)> for F
        where
            F: Fn($($T,)* Rest<V>) -> R + Send + Sync + 'static,
            R: IntoReturns,
            $($T: FromHost,)*
            V: FromHost,
        {
            #[allow(non_snake_case, unused_mut)]
            fn into_variadic_function(self) -> HostFunction {
                HostFunction::from_fn(count!($($T)*), true, move |args| {
                    let mut args = args.into_iter();
                    $(let $T = coerce_arg::<$T>(args.next().unwrap_or_default())?;)*
                    let rest = args.map(coerce_arg::<V>).collect::<BridgeResult<Vec<V>>>()?;
                    (self)($($T,)* Rest(rest)).into_returns()
                })
            }
        }
    };
}

impl_into_host_function!();
impl_into_host_function!(A);
impl_into_host_function!(A, B);
impl_into_host_function!(A, B, C);
impl_into_host_function!(A, B, C, D);
impl_into_host_function!(A, B, C, D, E);
impl_into_host_function!(A, B, C, D, E, G);

/// Results of a host function.
pub trait IntoReturns {
    fn into_returns(self) -> BridgeResult<Vec<HostValue>>;
}

impl IntoReturns for () {
    fn into_returns(self) -> BridgeResult<Vec<HostValue>> {
        Ok(Vec::new())
    }
}

impl<T: IntoHost> IntoReturns for T {
    fn into_returns(self) -> BridgeResult<Vec<HostValue>> {
        Ok(vec![self.into_host()])
    }
}

macro_rules! impl_into_returns_tuple {
    ($($T:ident),+) => {
        impl<$($T: IntoHost),+> IntoReturns for ($($T,)+) {
            #[allow(non_snake_case)]
            fn into_returns(self) -> BridgeResult<Vec<HostValue>> {
                let ($($T,)+) = self;
                Ok(vec![$($T.into_host()),+])
            }
        }
    };
}

impl_into_returns_tuple!(A, B);
impl_into_returns_tuple!(A, B, C);
impl_into_returns_tuple!(A, B, C, D);

/// A trailing error result: when set, the other results are discarded and
/// script code sees an exception with the error's message.
impl<T: IntoReturns, E: fmt::Display> IntoReturns for Result<T, E> {
    fn into_returns(self) -> BridgeResult<Vec<HostValue>> {
        match self {
            Ok(value) => value.into_returns(),
            Err(err) => Err(BridgeError::Host(err.to_string())),
        }
    }
}
