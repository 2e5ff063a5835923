//! Typed conversions
//!
//! [`IntoHost`] and [`FromHost`] move concrete Rust types in and out of
//! [`HostValue`]. Conversion out of a host value is lenient the same way
//! assignment through a proxy is: `Nil` becomes the zero value, numbers are
//! cast between widths, and bytes and strings convert into each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{BridgeError, BridgeResult};
use crate::function::HostFunction;
use crate::script::ScriptFunction;
use crate::shared::{HostObject, Shared};
use crate::value::{Bytes, HostValue, OpaqueRef};

/// Conversion of a Rust value into a [`HostValue`].
pub trait IntoHost {
    fn into_host(self) -> HostValue;
}

/// Conversion of a [`HostValue`] into a Rust value.
pub trait FromHost: Sized {
    fn from_host(value: HostValue) -> BridgeResult<Self>;
}

pub(crate) fn mismatch(value: &HostValue, to: &'static str) -> BridgeError {
    BridgeError::Conversion {
        from: value.kind().name(),
        to,
    }
}

impl IntoHost for HostValue {
    fn into_host(self) -> HostValue {
        self
    }
}

impl FromHost for HostValue {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        Ok(value)
    }
}

impl IntoHost for bool {
    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }
}

impl FromHost for bool {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Nil => Ok(false),
            HostValue::Bool(b) => Ok(b),
            other => Err(mismatch(&other, "bool")),
        }
    }
}

macro_rules! impl_number {
    ($variant:ident as $wide:ty: $($t:ty),* $(,)?) => {
        $(
            impl IntoHost for $t {
                fn into_host(self) -> HostValue {
                    HostValue::$variant(self as $wide)
                }
            }

            impl FromHost for $t {
                fn from_host(value: HostValue) -> BridgeResult<Self> {
                    match value {
                        HostValue::Nil => Ok(0 as $t),
                        HostValue::Int(i) => Ok(i as $t),
                        HostValue::UInt(u) => Ok(u as $t),
                        HostValue::Float(f) => Ok(f as $t),
                        other => Err(mismatch(&other, stringify!($t))),
                    }
                }
            }
        )*
    };
}

impl_number!(Int as i64: i8, i16, i32, i64, isize, u8, u16, u32);
impl_number!(UInt as u64: u64, usize);
impl_number!(Float as f64: f32, f64);

impl IntoHost for String {
    fn into_host(self) -> HostValue {
        HostValue::String(self)
    }
}

impl IntoHost for &str {
    fn into_host(self) -> HostValue {
        HostValue::String(self.to_string())
    }
}

impl FromHost for String {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Nil => Ok(String::new()),
            HostValue::String(s) => Ok(s),
            HostValue::Bytes(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(mismatch(&other, "string")),
        }
    }
}

impl IntoHost for Bytes {
    fn into_host(self) -> HostValue {
        HostValue::Bytes(self.0)
    }
}

impl FromHost for Bytes {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Nil => Ok(Bytes::default()),
            HostValue::Bytes(b) => Ok(Bytes(b)),
            HostValue::String(s) => Ok(Bytes(s.into_bytes())),
            other => Err(mismatch(&other, "bytes")),
        }
    }
}

impl<T: IntoHost> IntoHost for Option<T> {
    fn into_host(self) -> HostValue {
        match self {
            Some(value) => value.into_host(),
            None => HostValue::Nil,
        }
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Nil => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }
}

impl<T: IntoHost> IntoHost for Vec<T> {
    fn into_host(self) -> HostValue {
        HostValue::List(self.into_iter().map(IntoHost::into_host).collect())
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Nil => Ok(Vec::new()),
            HostValue::List(items) => items.into_iter().map(T::from_host).collect(),
            HostValue::Sequence(seq) => (0..seq.len())
                .map(|i| T::from_host(seq.element(i).unwrap_or_default()))
                .collect(),
            other => Err(mismatch(&other, "list")),
        }
    }
}

macro_rules! impl_map {
    ($($map:ident),* $(,)?) => {
        $(
            impl<V: IntoHost> IntoHost for $map<String, V> {
                fn into_host(self) -> HostValue {
                    HostValue::Map(self.into_iter().map(|(k, v)| (k, v.into_host())).collect())
                }
            }

            impl<V: FromHost> FromHost for $map<String, V> {
                fn from_host(value: HostValue) -> BridgeResult<Self> {
                    match value {
                        HostValue::Nil => Ok(Self::default()),
                        HostValue::Map(entries) => entries
                            .into_iter()
                            .map(|(k, v)| Ok((k, V::from_host(v)?)))
                            .collect(),
                        HostValue::Mapping(map) => map
                            .keys()
                            .into_iter()
                            .map(|k| {
                                let v = V::from_host(map.get(&k).unwrap_or_default())?;
                                Ok((k, v))
                            })
                            .collect(),
                        other => Err(mismatch(&other, "map")),
                    }
                }
            }
        )*
    };
}

impl_map!(HashMap, BTreeMap, IndexMap);

/// Recovers the shared container behind a sequence, mapping or record.
impl<T: Send + Sync + 'static> FromHost for Shared<T> {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        let shared = match &value {
            HostValue::Sequence(seq) => seq.downcast(),
            HostValue::Mapping(map) => map.downcast(),
            HostValue::Record(record) => record.downcast(),
            _ => None,
        };
        shared.ok_or_else(|| mismatch(&value, std::any::type_name::<T>()))
    }
}

impl<T: HostObject> IntoHost for Arc<T> {
    fn into_host(self) -> HostValue {
        HostValue::object(self)
    }
}

impl IntoHost for HostFunction {
    fn into_host(self) -> HostValue {
        HostValue::Function(self)
    }
}

impl FromHost for HostFunction {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Function(function) => Ok(function),
            HostValue::Script(function) => Ok(HostFunction::forward(function)),
            other => Err(mismatch(&other, "function")),
        }
    }
}

impl IntoHost for ScriptFunction {
    fn into_host(self) -> HostValue {
        HostValue::Script(self)
    }
}

impl FromHost for ScriptFunction {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Script(function) => Ok(function),
            other => Err(mismatch(&other, "script function")),
        }
    }
}

impl IntoHost for OpaqueRef {
    fn into_host(self) -> HostValue {
        HostValue::Opaque(self)
    }
}

impl FromHost for OpaqueRef {
    fn from_host(value: HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Opaque(opaque) => Ok(opaque),
            other => Err(mismatch(&other, "opaque")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_zero() {
        assert_eq!(i32::from_host(HostValue::Nil).unwrap(), 0);
        assert_eq!(f64::from_host(HostValue::Nil).unwrap(), 0.0);
        assert_eq!(String::from_host(HostValue::Nil).unwrap(), "");
        assert!(!bool::from_host(HostValue::Nil).unwrap());
        assert!(Vec::<i64>::from_host(HostValue::Nil).unwrap().is_empty());
        assert_eq!(Option::<i64>::from_host(HostValue::Nil).unwrap(), None);
    }

    #[test]
    fn test_numeric_casts() {
        assert_eq!(i64::from_host(HostValue::Float(3.9)).unwrap(), 3);
        assert_eq!(u8::from_host(HostValue::Int(7)).unwrap(), 7);
        assert_eq!(f32::from_host(HostValue::UInt(2)).unwrap(), 2.0);
    }

    #[test]
    fn test_unsigned_widths() {
        assert_eq!(5u32.into_host(), HostValue::Int(5));
        assert!(matches!(u64::MAX.into_host(), HostValue::UInt(u64::MAX)));
    }

    #[test]
    fn test_bytes_and_strings() {
        assert_eq!(String::from_host(HostValue::Bytes(b"hi".to_vec())).unwrap(), "hi");
        assert_eq!(Bytes::from_host(HostValue::String("hi".into())).unwrap().0, b"hi");
        assert!(matches!(Bytes(vec![1]).into_host(), HostValue::Bytes(_)));
        assert!(matches!(vec![1u8].into_host(), HostValue::List(_)));
    }

    #[test]
    fn test_mismatch_reports_kinds() {
        let err = bool::from_host(HostValue::String("yes".into())).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert string to bool");
    }

    #[test]
    fn test_maps() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1i64);

        let host = map.clone().into_host();
        assert_eq!(HashMap::<String, i64>::from_host(host).unwrap(), map);
    }

    #[test]
    fn test_shared_from_sequence() {
        let shared = Shared::new(vec![1i64]);
        let back = Shared::<Vec<i64>>::from_host(HostValue::sequence(&shared)).unwrap();
        assert!(back.ptr_eq(&shared));
        assert!(Shared::<Vec<i64>>::from_host(HostValue::Int(1)).is_err());
    }
}
