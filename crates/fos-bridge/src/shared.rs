//! Shared host containers
//!
//! Host values that script code should see *by reference* live in a
//! [`Shared`] cell. The bridge proxies them into the script engine, so a
//! write made on one side is visible on the other without copying.
//!
//! Four structural categories are supported:
//!
//! - [`HostSequence`]: indexable with a length (`Vec<T>`, `[T; N]`)
//! - [`HostMapping`]: string-keyed maps (`HashMap`, `BTreeMap`, `IndexMap`)
//! - [`HostRecord`]: named fields plus optional methods (user structs)
//! - [`HostObject`]: methods only (interface values)

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use crate::convert::{FromHost, IntoHost};
use crate::error::BridgeResult;
use crate::function::HostFunction;
use crate::value::HostValue;

type AnyArc = Arc<dyn Any + Send + Sync>;

/// A host value shared by reference with script code.
pub struct Shared<T: ?Sized>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }
}

impl<T: ?Sized> Shared<T> {
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&&*self.read()).finish()
    }
}

// ============================================================================
// Category traits
// ============================================================================

/// An indexable container with a length.
pub trait HostSequence: Send + Sync + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, or `None` when out of range.
    fn element(&self, index: usize) -> Option<HostValue>;

    /// Assign the element at `index`. Returns `false` when out of range.
    fn set_element(&mut self, index: usize, value: HostValue) -> BridgeResult<bool>;
}

/// A string-keyed map.
pub trait HostMapping: Send + Sync + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &str) -> Option<HostValue>;

    fn insert(&mut self, key: &str, value: HostValue) -> BridgeResult<()>;

    fn keys(&self) -> Vec<String>;
}

/// A structure with named fields and optional methods.
///
/// Field and method names are matched exactly; script code reaches a field
/// `Count` by writing `count` (first letter upper-cased on lookup).
pub trait HostRecord: Send + Sync + 'static {
    fn field(&self, name: &str) -> Option<HostValue>;

    /// Assign a field. Returns `false` when the record has no such field.
    fn set_field(&mut self, name: &str, value: HostValue) -> BridgeResult<bool>;

    /// Method bound to this record.
    fn method(this: &Shared<Self>, name: &str) -> Option<HostFunction>
    where
        Self: Sized,
    {
        let _ = (this, name);
        None
    }
}

/// A value that exposes only methods.
pub trait HostObject: Send + Sync + 'static {
    fn method(self: Arc<Self>, name: &str) -> Option<HostFunction>;
}

// ============================================================================
// Std implementations
// ============================================================================

impl<T> HostSequence for Vec<T>
where
    T: FromHost + IntoHost + Clone + Send + Sync + 'static,
{
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn element(&self, index: usize) -> Option<HostValue> {
        self.as_slice().get(index).cloned().map(IntoHost::into_host)
    }

    fn set_element(&mut self, index: usize, value: HostValue) -> BridgeResult<bool> {
        match self.as_mut_slice().get_mut(index) {
            Some(slot) => {
                *slot = T::from_host(value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<T, const N: usize> HostSequence for [T; N]
where
    T: FromHost + IntoHost + Clone + Send + Sync + 'static,
{
    fn len(&self) -> usize {
        N
    }

    fn element(&self, index: usize) -> Option<HostValue> {
        self.as_slice().get(index).cloned().map(IntoHost::into_host)
    }

    fn set_element(&mut self, index: usize, value: HostValue) -> BridgeResult<bool> {
        match self.as_mut_slice().get_mut(index) {
            Some(slot) => {
                *slot = T::from_host(value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

macro_rules! impl_host_mapping {
    ($($map:ident),* $(,)?) => {
        $(
            impl<V> HostMapping for $map<String, V>
            where
                V: FromHost + IntoHost + Clone + Send + Sync + 'static,
            {
                fn len(&self) -> usize {
                    $map::len(self)
                }

                fn get(&self, key: &str) -> Option<HostValue> {
                    $map::get(self, key).cloned().map(IntoHost::into_host)
                }

                fn insert(&mut self, key: &str, value: HostValue) -> BridgeResult<()> {
                    $map::insert(self, key.to_string(), V::from_host(value)?);
                    Ok(())
                }

                fn keys(&self) -> Vec<String> {
                    $map::keys(self).cloned().collect()
                }
            }
        )*
    };
}

impl_host_mapping!(HashMap, BTreeMap, IndexMap);

// ============================================================================
// Erased references
// ============================================================================

/// Type-erased handle to a [`Shared`] sequence.
#[derive(Clone)]
pub struct SequenceRef {
    cell: Arc<RwLock<dyn HostSequence>>,
    any: AnyArc,
}

impl SequenceRef {
    pub(crate) fn new<T: HostSequence>(shared: &Shared<T>) -> Self {
        let cell: Arc<RwLock<T>> = Arc::clone(&shared.0);
        Self {
            cell: cell.clone(),
            any: cell,
        }
    }

    pub fn len(&self) -> usize {
        self.cell.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self, index: usize) -> Option<HostValue> {
        self.cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .element(index)
    }

    pub fn set_element(&self, index: usize, value: HostValue) -> BridgeResult<bool> {
        self.cell
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_element(index, value)
    }

    /// Recover the typed shared container.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Shared<T>> {
        downcast_shared(&self.any)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.any) as *const () as usize
    }
}

/// Type-erased handle to a [`Shared`] mapping.
#[derive(Clone)]
pub struct MappingRef {
    cell: Arc<RwLock<dyn HostMapping>>,
    any: AnyArc,
}

impl MappingRef {
    pub(crate) fn new<T: HostMapping>(shared: &Shared<T>) -> Self {
        let cell: Arc<RwLock<T>> = Arc::clone(&shared.0);
        Self {
            cell: cell.clone(),
            any: cell,
        }
    }

    pub fn len(&self) -> usize {
        self.cell.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.cell.read().unwrap_or_else(PoisonError::into_inner).get(key)
    }

    pub fn insert(&self, key: &str, value: HostValue) -> BridgeResult<()> {
        self.cell
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.cell.read().unwrap_or_else(PoisonError::into_inner).keys()
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Shared<T>> {
        downcast_shared(&self.any)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.any) as *const () as usize
    }
}

/// Type-erased handle to a [`Shared`] record.
#[derive(Clone)]
pub struct RecordRef {
    cell: Arc<RwLock<dyn HostRecord>>,
    any: AnyArc,
    method: fn(&AnyArc, &str) -> Option<HostFunction>,
    type_name: &'static str,
    addressable: bool,
}

impl RecordRef {
    pub(crate) fn new<T: HostRecord>(shared: &Shared<T>) -> Self {
        let cell: Arc<RwLock<T>> = Arc::clone(&shared.0);
        Self {
            cell: cell.clone(),
            any: cell,
            method: record_method::<T>,
            type_name: std::any::type_name::<T>(),
            addressable: true,
        }
    }

    pub(crate) fn by_value<T: HostRecord>(shared: &Shared<T>) -> Self {
        Self {
            addressable: false,
            ..Self::new(shared)
        }
    }

    pub fn field(&self, name: &str) -> Option<HostValue> {
        self.cell.read().unwrap_or_else(PoisonError::into_inner).field(name)
    }

    /// Assign a field. Records exposed by value reject every write.
    pub fn set_field(&self, name: &str, value: HostValue) -> BridgeResult<bool> {
        if !self.addressable {
            return Ok(false);
        }
        self.cell
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_field(name, value)
    }

    pub fn method(&self, name: &str) -> Option<HostFunction> {
        (self.method)(&self.any, name)
    }

    /// Whether script writes reach the host record.
    pub fn is_addressable(&self) -> bool {
        self.addressable
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Shared<T>> {
        downcast_shared(&self.any)
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.any) as *const () as usize
    }
}

fn record_method<T: HostRecord>(any: &AnyArc, name: &str) -> Option<HostFunction> {
    let shared = downcast_shared::<T>(any)?;
    T::method(&shared, name)
}

/// Handle to an interface value.
#[derive(Clone)]
pub struct ObjectRef {
    object: Arc<dyn HostObject>,
    type_name: &'static str,
}

impl ObjectRef {
    pub(crate) fn new<T: HostObject>(object: Arc<T>) -> Self {
        Self {
            object,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn method(&self, name: &str) -> Option<HostFunction> {
        Arc::clone(&self.object).method(name)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.object) as *const () as usize
    }
}

fn downcast_shared<T: Send + Sync + 'static>(any: &AnyArc) -> Option<Shared<T>> {
    Arc::clone(any).downcast::<RwLock<T>>().ok().map(Shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        count: i64,
    }

    impl HostRecord for Counter {
        fn field(&self, name: &str) -> Option<HostValue> {
            match name {
                "Count" => Some(HostValue::Int(self.count)),
                _ => None,
            }
        }

        fn set_field(&mut self, name: &str, value: HostValue) -> BridgeResult<bool> {
            match name {
                "Count" => {
                    self.count = i64::from_host(value)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    #[test]
    fn test_sequence_ref_writes_through() {
        let shared = Shared::new(vec![1i64, 2, 3]);
        let seq = SequenceRef::new(&shared);

        assert_eq!(seq.len(), 3);
        assert_eq!(seq.element(1), Some(HostValue::Int(2)));
        assert_eq!(seq.element(3), None);

        assert!(seq.set_element(0, HostValue::Float(9.0)).unwrap());
        assert!(!seq.set_element(5, HostValue::Int(1)).unwrap());
        assert_eq!(*shared.read(), vec![9, 2, 3]);
    }

    #[test]
    fn test_mapping_ref_insert() {
        let shared = Shared::new(HashMap::<String, String>::new());
        let map = MappingRef::new(&shared);

        map.insert("key", HostValue::String("value".into())).unwrap();
        assert_eq!(shared.read().get("key").map(String::as_str), Some("value"));
        assert_eq!(map.keys(), vec!["key".to_string()]);
    }

    #[test]
    fn test_downcast_recovers_same_container() {
        let shared = Shared::new(vec![1u8, 2]);
        let seq = SequenceRef::new(&shared);

        let back = seq.downcast::<Vec<u8>>().unwrap();
        assert!(back.ptr_eq(&shared));
        assert!(seq.downcast::<Vec<i64>>().is_none());
    }

    #[test]
    fn test_record_by_value_rejects_writes() {
        let shared = Shared::new(Counter { count: 1 });

        let by_value = RecordRef::by_value(&shared);
        assert!(!by_value.set_field("Count", HostValue::Int(5)).unwrap());
        assert_eq!(shared.read().count, 1);

        let by_ref = RecordRef::new(&shared);
        assert!(by_ref.set_field("Count", HostValue::Int(5)).unwrap());
        assert_eq!(by_ref.field("Count"), Some(HostValue::Int(5)));
        assert!(by_ref.method("Count").is_none());
    }
}
