//! Handle registry
//!
//! Host values exposed to script code by reference are parked here under a
//! small integer handle. Each live proxy holds one reference on its handle;
//! the entry goes away when the last proxy is collected.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use crate::value::HostValue;

/// Integer identifier of a registered host value. Never zero.
pub(crate) type Handle = u32;

struct Entry {
    value: HostValue,
    refs: usize,
    identity: Option<usize>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Handle, Entry>,
    identities: HashMap<usize, Handle>,
    /// Released handles, reissued smallest first
    free: BTreeSet<Handle>,
    next: Handle,
    epoch: u64,
}

/// Session-scoped map from handles to host values.
#[derive(Default)]
pub(crate) struct HandleRegistry {
    inner: Mutex<Inner>,
}

impl HandleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `value`, or take another reference on its existing handle.
    ///
    /// Values with an allocation identity map to a single handle no matter
    /// how often they are registered.
    pub fn register(self: &Arc<Self>, value: HostValue) -> HandleGuard {
        let identity = value.identity();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = inner.epoch;

        if let Some(handle) = identity.and_then(|id| inner.identities.get(&id).copied()) {
            if let Some(entry) = inner.entries.get_mut(&handle) {
                entry.refs += 1;
                return HandleGuard::new(self, handle, epoch);
            }
        }

        let handle = match inner.free.pop_first() {
            Some(handle) => handle,
            None => {
                inner.next += 1;
                inner.next
            }
        };
        inner.entries.insert(
            handle,
            Entry {
                value,
                refs: 1,
                identity,
            },
        );
        if let Some(id) = identity {
            inner.identities.insert(id, handle);
        }
        tracing::trace!(handle, "registered host value");
        HandleGuard::new(self, handle, epoch)
    }

    /// Value registered under `handle`, if it is still live.
    pub fn lookup(&self, handle: Handle) -> Option<HostValue> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(&handle).map(|entry| entry.value.clone())
    }

    /// Drop one reference. Returns the value when that was the last one.
    fn release(&self, handle: Handle, epoch: u64) -> Option<HostValue> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.epoch != epoch {
            return None;
        }

        let entry = inner.entries.get_mut(&handle)?;
        entry.refs -= 1;
        if entry.refs > 0 {
            return None;
        }

        let entry = inner.entries.remove(&handle)?;
        if let Some(id) = entry.identity {
            inner.identities.remove(&id);
        }
        inner.free.insert(handle);
        tracing::trace!(handle, "released host value");
        Some(entry.value)
    }

    /// Forget every entry. Outstanding guards become no-ops.
    pub fn clear(&self) {
        let entries = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let epoch = inner.epoch + 1;
            std::mem::replace(
                &mut *inner,
                Inner {
                    epoch,
                    ..Inner::default()
                },
            )
            .entries
        };
        drop(entries);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// One reference on a registered handle, released on drop.
pub(crate) struct HandleGuard {
    registry: Arc<HandleRegistry>,
    handle: Handle,
    epoch: u64,
}

impl HandleGuard {
    fn new(registry: &Arc<HandleRegistry>, handle: Handle, epoch: u64) -> Self {
        Self {
            registry: Arc::clone(registry),
            handle,
            epoch,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        // The released value is dropped here, after the registry lock is gone.
        let _released = self.registry.release(self.handle, self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Shared;

    fn shared_value() -> HostValue {
        HostValue::sequence(&Shared::new(vec![1i64, 2, 3]))
    }

    #[test]
    fn test_handles_start_at_one() {
        let registry = HandleRegistry::new();
        let guard = registry.register(shared_value());
        assert_eq!(guard.handle(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_value_same_handle() {
        let registry = HandleRegistry::new();
        let value = shared_value();

        let a = registry.register(value.clone());
        let b = registry.register(value);
        assert_eq!(a.handle(), b.handle());
        assert_eq!(registry.len(), 1);

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_smallest_handle_reused() {
        let registry = HandleRegistry::new();
        let one = registry.register(shared_value());
        let two = registry.register(shared_value());
        let three = registry.register(shared_value());
        assert_eq!(three.handle(), 3);

        drop(two);
        drop(one);

        let next = registry.register(shared_value());
        assert_eq!(next.handle(), 1);
        let after = registry.register(shared_value());
        assert_eq!(after.handle(), 2);
    }

    #[test]
    fn test_lookup_after_release() {
        let registry = HandleRegistry::new();
        let guard = registry.register(HostValue::Int(5));
        let handle = guard.handle();

        assert_eq!(registry.lookup(handle), Some(HostValue::Int(5)));
        drop(guard);
        assert_eq!(registry.lookup(handle), None);
    }

    #[test]
    fn test_clear_detaches_guards() {
        let registry = HandleRegistry::new();
        let stale = registry.register(shared_value());
        registry.clear();
        assert_eq!(registry.len(), 0);

        let fresh = registry.register(shared_value());
        assert_eq!(fresh.handle(), 1);
        drop(stale);
        assert_eq!(registry.lookup(fresh.handle()).map(|v| v.kind()), Some(crate::value::Kind::Sequence));
    }
}
