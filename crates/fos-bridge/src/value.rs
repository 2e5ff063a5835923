//! Host values
//!
//! [`HostValue`] is the host side of every value crossing the bridge. It is a
//! closed set of structural categories so every dispatch over it is an
//! exhaustive `match`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::function::HostFunction;
use crate::script::ScriptFunction;
use crate::shared::{
    HostMapping, HostObject, HostRecord, HostSequence, MappingRef, ObjectRef, RecordRef,
    SequenceRef, Shared,
};

/// A value owned by the host program.
#[derive(Clone, Default)]
pub enum HostValue {
    /// Absence of a value (script `null`/`undefined`)
    #[default]
    Nil,
    Bool(bool),
    /// Any signed integer, and unsigned integers up to 32 bits
    Int(i64),
    /// 64-bit unsigned integers
    UInt(u64),
    Float(f64),
    /// Raw bytes, seen by script code as a string
    Bytes(Vec<u8>),
    String(String),
    /// Detached, host-owned sequence (decoded script array)
    List(Vec<HostValue>),
    /// Detached, host-owned mapping (decoded script object)
    Map(IndexMap<String, HostValue>),
    /// Shared sequence, proxied into script without copying
    Sequence(SequenceRef),
    /// Shared string-keyed mapping
    Mapping(MappingRef),
    /// Shared record with named fields and methods
    Record(RecordRef),
    /// Interface value exposing methods only
    Object(ObjectRef),
    /// Host function callable from script
    Function(HostFunction),
    /// Script function callable from the host
    Script(ScriptFunction),
    /// Host value with no structural category
    Opaque(OpaqueRef),
}

/// Structural category of a [`HostValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    UInt,
    Float,
    Bytes,
    String,
    List,
    Map,
    Sequence,
    Mapping,
    Record,
    Object,
    Function,
    Script,
    Opaque,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "nil",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::UInt => "uint",
            Kind::Float => "float",
            Kind::Bytes => "bytes",
            Kind::String => "string",
            Kind::List => "list",
            Kind::Map => "map",
            Kind::Sequence => "sequence",
            Kind::Mapping => "mapping",
            Kind::Record => "record",
            Kind::Object => "object",
            Kind::Function => "function",
            Kind::Script => "script function",
            Kind::Opaque => "opaque",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl HostValue {
    pub fn kind(&self) -> Kind {
        match self {
            HostValue::Nil => Kind::Nil,
            HostValue::Bool(_) => Kind::Bool,
            HostValue::Int(_) => Kind::Int,
            HostValue::UInt(_) => Kind::UInt,
            HostValue::Float(_) => Kind::Float,
            HostValue::Bytes(_) => Kind::Bytes,
            HostValue::String(_) => Kind::String,
            HostValue::List(_) => Kind::List,
            HostValue::Map(_) => Kind::Map,
            HostValue::Sequence(_) => Kind::Sequence,
            HostValue::Mapping(_) => Kind::Mapping,
            HostValue::Record(_) => Kind::Record,
            HostValue::Object(_) => Kind::Object,
            HostValue::Function(_) => Kind::Function,
            HostValue::Script(_) => Kind::Script,
            HostValue::Opaque(_) => Kind::Opaque,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Expose a shared sequence by reference.
    pub fn sequence<T: HostSequence>(shared: &Shared<T>) -> Self {
        HostValue::Sequence(SequenceRef::new(shared))
    }

    /// Expose a shared mapping by reference.
    pub fn mapping<T: HostMapping>(shared: &Shared<T>) -> Self {
        HostValue::Mapping(MappingRef::new(shared))
    }

    /// Expose a shared record by reference; script code may write its fields.
    pub fn record<T: HostRecord>(shared: &Shared<T>) -> Self {
        HostValue::Record(RecordRef::new(shared))
    }

    /// Expose a record by value; script code may read it but not write it.
    pub fn record_value<T: HostRecord>(record: T) -> Self {
        HostValue::Record(RecordRef::by_value(&Shared::new(record)))
    }

    /// Expose an interface value.
    pub fn object<T: HostObject>(object: Arc<T>) -> Self {
        HostValue::Object(ObjectRef::new(object))
    }

    /// Wrap a host value the bridge has no conversion for.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        HostValue::Opaque(OpaqueRef(Arc::new(value)))
    }

    /// Numeric value, if this is any kind of number.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            HostValue::Int(i) => Some(i as f64),
            HostValue::UInt(u) => Some(u as f64),
            HostValue::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Allocation identity of shared values, used for handle deduplication.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            HostValue::Sequence(seq) => Some(seq.identity()),
            HostValue::Mapping(map) => Some(map.identity()),
            HostValue::Record(record) => Some(record.identity()),
            HostValue::Object(object) => Some(object.identity()),
            HostValue::Function(function) => Some(function.identity()),
            HostValue::Script(function) => Some(function.identity()),
            HostValue::Opaque(opaque) => Some(opaque.identity()),
            HostValue::Nil
            | HostValue::Bool(_)
            | HostValue::Int(_)
            | HostValue::UInt(_)
            | HostValue::Float(_)
            | HostValue::Bytes(_)
            | HostValue::String(_)
            | HostValue::List(_)
            | HostValue::Map(_) => None,
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Int(_) | UInt(_) | Float(_), Int(_) | UInt(_) | Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Bytes(a), Bytes(b)) => a == b,
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Record(a), Record(b)) => a.identity() == b.identity() && a.is_addressable() == b.is_addressable(),
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b && self.kind() == other.kind(),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("Nil"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Int(i) => write!(f, "Int({i})"),
            HostValue::UInt(u) => write!(f, "UInt({u})"),
            HostValue::Float(x) => write!(f, "Float({x})"),
            HostValue::Bytes(b) => write!(f, "Bytes({:?})", String::from_utf8_lossy(b)),
            HostValue::String(s) => write!(f, "String({s:?})"),
            HostValue::List(items) => f.debug_tuple("List").field(items).finish(),
            HostValue::Map(map) => f.debug_tuple("Map").field(map).finish(),
            HostValue::Sequence(seq) => write!(f, "Sequence(len={})", seq.len()),
            HostValue::Mapping(map) => write!(f, "Mapping(len={})", map.len()),
            HostValue::Record(record) => write!(f, "Record({})", record.type_name()),
            HostValue::Object(object) => write!(f, "Object({})", object.type_name()),
            HostValue::Function(function) => write!(f, "{function:?}"),
            HostValue::Script(function) => write!(f, "{function:?}"),
            HostValue::Opaque(_) => f.write_str("Opaque"),
        }
    }
}

/// A byte sequence, exchanged with script code as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Bytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Type-erased host value.
#[derive(Clone)]
pub struct OpaqueRef(Arc<dyn Any + Send + Sync>);

impl OpaqueRef {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_by_value() {
        assert_eq!(HostValue::Int(3), HostValue::Float(3.0));
        assert_eq!(HostValue::UInt(7), HostValue::Int(7));
        assert_ne!(HostValue::Int(3), HostValue::Float(3.5));
        assert_ne!(HostValue::Int(1), HostValue::Bool(true));
    }

    #[test]
    fn test_shared_values_compare_by_identity() {
        let a = Shared::new(vec![1i64, 2]);
        let b = Shared::new(vec![1i64, 2]);

        assert_eq!(HostValue::sequence(&a), HostValue::sequence(&a.clone()));
        assert_ne!(HostValue::sequence(&a), HostValue::sequence(&b));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(HostValue::Nil.kind(), Kind::Nil);
        assert_eq!(HostValue::String("x".into()).kind().name(), "string");
        assert_eq!(HostValue::opaque(5u8).kind(), Kind::Opaque);
        assert!(HostValue::default().is_nil());
    }

    #[test]
    fn test_identity_only_for_shared_kinds() {
        assert!(HostValue::Int(1).identity().is_none());
        assert!(HostValue::List(vec![]).identity().is_none());
        assert!(HostValue::mapping(&Shared::new(IndexMap::<String, i64>::new())).identity().is_some());
    }
}
