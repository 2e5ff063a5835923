//! Function stash
//!
//! Script functions handed to the host are kept alive here, keyed by a
//! generational index, until the last host-side reference is dropped.
//! Removal is deferred: dropping a reference only queues the key, and the
//! session frees the engine value the next time it holds the engine lock.

use std::sync::{Mutex, PoisonError};

use rquickjs::{Ctx, Function, Persistent};

/// A script function kept alive outside any engine scope.
#[derive(Clone)]
pub(crate) struct StashedFunction(Persistent<Function<'static>>);

// SAFETY: the wrapped value points into a session's engine runtime. Every
// `StashedFunction` is created, restored, cloned and dropped only while the
// owning session holds its engine lock (inside `SessionCore::enter`, the
// session's GC path or its teardown), so the runtime is never touched from
// two threads at once. Outside the lock the value is only moved.
unsafe impl Send for StashedFunction {}
unsafe impl Sync for StashedFunction {}

impl StashedFunction {
    pub fn save<'js>(ctx: &Ctx<'js>, function: Function<'js>) -> Self {
        Self(Persistent::save(ctx, function))
    }

    /// Bring the function back into `ctx`. Fails when `ctx` belongs to a
    /// different runtime.
    pub fn restore<'js>(self, ctx: &Ctx<'js>) -> rquickjs::Result<Function<'js>> {
        self.0.restore(ctx)
    }
}

/// Generational index into the stash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StashKey {
    pub index: u32,
    pub generation: u32,
}

struct Slot {
    generation: u32,
    function: Option<StashedFunction>,
}

/// Slot table plus the keys waiting for release.
#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    vacant: Vec<u32>,
    pending: Vec<StashKey>,
}

impl Slots {
    fn occupy(&mut self, function: StashedFunction) -> StashKey {
        match self.vacant.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.function = Some(function);
                StashKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    function: Some(function),
                });
                StashKey { index, generation: 0 }
            }
        }
    }

    fn live(&self, key: StashKey) -> Option<&StashedFunction> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.function.as_ref()
    }

    /// Empty the slot under `key` and bump its generation so the key goes
    /// stale.
    fn vacate(&mut self, key: StashKey) -> Option<StashedFunction> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let function = slot.function.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(key.index);
        Some(function)
    }
}

/// Persisted script functions owned by one session.
pub(crate) struct FunctionStash {
    inner: Mutex<Slots>,
}

impl FunctionStash {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots::default()),
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, function: StashedFunction) -> StashKey {
        self.slots().occupy(function)
    }

    pub fn get(&self, key: StashKey) -> Option<StashedFunction> {
        self.slots().live(key).cloned()
    }

    /// Queue `key` for removal at the next [`FunctionStash::drain_pending`].
    pub fn schedule_release(&self, key: StashKey) {
        self.slots().pending.push(key);
    }

    /// Remove every queued key. The caller drops the returned functions
    /// while holding the engine lock.
    pub fn drain_pending(&self) -> Vec<StashedFunction> {
        let mut slots = self.slots();
        let keys = std::mem::take(&mut slots.pending);
        keys.into_iter().filter_map(|key| slots.vacate(key)).collect()
    }

    /// Remove everything, queued or not.
    pub fn clear(&self) -> Vec<StashedFunction> {
        let mut guard = self.slots();
        guard.pending.clear();
        let Slots { slots, vacant, .. } = &mut *guard;
        let mut released = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(function) = slot.function.take() {
                slot.generation = slot.generation.wrapping_add(1);
                vacant.push(index as u32);
                released.push(function);
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.slots()
            .slots
            .iter()
            .filter(|slot| slot.function.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn with_engine(f: impl for<'js> FnOnce(&Ctx<'js>)) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| f(&ctx));
    }

    fn stash_source<'js>(ctx: &Ctx<'js>, stash: &FunctionStash, source: &str) -> StashKey {
        let function: Function = ctx.eval(source).unwrap();
        stash.insert(StashedFunction::save(ctx, function))
    }

    fn call<'js>(ctx: &Ctx<'js>, stash: &FunctionStash, key: StashKey) -> Option<i32> {
        let function = stash.get(key)?.restore(ctx).unwrap();
        Some(function.call(()).unwrap())
    }

    #[test]
    fn test_stashed_function_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StashedFunction>();
        assert_send_sync::<FunctionStash>();
    }

    #[test]
    fn test_release_waits_for_drain() {
        with_engine(|ctx| {
            let stash = FunctionStash::new();
            let key = stash_source(ctx, &stash, "() => 1");
            assert_eq!(call(ctx, &stash, key), Some(1));

            stash.schedule_release(key);
            assert_eq!(stash.len(), 1);
            assert_eq!(call(ctx, &stash, key), Some(1));

            assert_eq!(stash.drain_pending().len(), 1);
            assert_eq!(stash.len(), 0);
            assert_eq!(call(ctx, &stash, key), None);
            assert!(stash.drain_pending().is_empty());
        });
    }

    #[test]
    fn test_stale_key_misses_reused_slot() {
        with_engine(|ctx| {
            let stash = FunctionStash::new();
            let old = stash_source(ctx, &stash, "() => 1");
            stash.schedule_release(old);
            drop(stash.drain_pending());

            let new = stash_source(ctx, &stash, "() => 2");
            assert_eq!(new.index, old.index);
            assert_ne!(new.generation, old.generation);
            assert_eq!(call(ctx, &stash, old), None);
            assert_eq!(call(ctx, &stash, new), Some(2));

            // A late release of the stale key must not free the new function.
            stash.schedule_release(old);
            assert!(stash.drain_pending().is_empty());
            assert_eq!(call(ctx, &stash, new), Some(2));
        });
    }

    #[test]
    fn test_clear_invalidates_keys() {
        with_engine(|ctx| {
            let stash = FunctionStash::new();
            let a = stash_source(ctx, &stash, "() => 1");
            let b = stash_source(ctx, &stash, "() => 2");
            stash.schedule_release(a);

            assert_eq!(stash.clear().len(), 2);
            assert_eq!(stash.len(), 0);
            assert_eq!(call(ctx, &stash, a), None);
            assert_eq!(call(ctx, &stash, b), None);
            assert!(stash.drain_pending().is_empty());

            let c = stash_source(ctx, &stash, "() => 3");
            assert_eq!(call(ctx, &stash, c), Some(3));
        });
    }
}
