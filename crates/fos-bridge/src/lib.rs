//! fOS Value Bridge
//!
//! Host/script value exchange for the fOS QuickJS runtime.
//!
//! Features:
//! - Sessions owning one engine, serialized behind a re-entrant lock
//! - Value codec between [`HostValue`] and engine values
//! - Zero-copy proxies for shared host sequences, mappings, records and objects
//! - Host functions callable from script, with variadic tails and error results
//! - Typed script function bindings resolved by name on every call
//!
//! ```ignore
//! use fos_bridge::{HostFunction, HostValue, Session, Shared};
//!
//! let session = Session::new()?;
//! let scores = Shared::new(vec![1i64, 2, 3]);
//! session.set_global("scores", HostValue::sequence(&scores))?;
//! session.set_global("add", HostFunction::new(|a: i64, b: i64| a + b))?;
//!
//! session.eval("scores[0] = add(scores[1], scores[2])")?;
//! assert_eq!(scores.read()[0], 5);
//! ```

// Counts identifiers in adapter macros.
macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

mod codec;
mod config;
mod console;
mod convert;
mod error;
mod function;
mod proxy;
mod registry;
mod scope;
mod script;
mod session;
mod shared;
mod stash;
mod value;

pub use config::SessionConfig;
pub use convert::{FromHost, IntoHost};
pub use error::{BridgeError, BridgeResult, ScriptException};
pub use function::{HostFunction, IntoHostFunction, IntoReturns, IntoVariadicFunction, Rest};
pub use script::{FromResults, FunctionSlot, IntoArg, IntoArgs, ScriptFn, ScriptFunction};
pub use session::{eval, Globals, Session, WeakSession};
pub use shared::{
    HostMapping, HostObject, HostRecord, HostSequence, MappingRef, ObjectRef, RecordRef,
    SequenceRef, Shared,
};
pub use value::{Bytes, HostValue, Kind, OpaqueRef};
