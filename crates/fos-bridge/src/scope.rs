//! Active engine scopes
//!
//! The engine context handed to a `Context::with` closure is only valid for
//! the duration of that closure. While one is running on this thread it is
//! recorded here, so a nested call into the same session (script calling a
//! host function that calls back into script) reuses it instead of taking
//! the session lock a second time.

use std::cell::RefCell;

use rquickjs::Ctx;

struct ActiveFrame {
    session: u64,
    ctx: *const (),
}

thread_local! {
    static ACTIVE: RefCell<Vec<ActiveFrame>> = const { RefCell::new(Vec::new()) };
}

/// Marks a context as active for `session` until dropped.
pub(crate) struct ScopeGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Record `ctx` as the active context of `session` on this thread.
///
/// The guard must be dropped before `ctx` goes out of scope.
pub(crate) fn enter(session: u64, ctx: &Ctx<'_>) -> ScopeGuard {
    ACTIVE.with(|frames| {
        frames.borrow_mut().push(ActiveFrame {
            session,
            ctx: ctx as *const Ctx<'_> as *const (),
        })
    });
    ScopeGuard {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Run `f` with the innermost active context of `session`, or hand `f`
/// back when no context of that session is active on this thread.
pub(crate) fn with_active<F, R>(session: u64, f: F) -> Result<R, F>
where
    F: for<'js> FnOnce(&Ctx<'js>) -> R,
{
    let found = ACTIVE.with(|frames| {
        frames
            .borrow()
            .iter()
            .rev()
            .find(|frame| frame.session == session)
            .map(|frame| frame.ctx)
    });
    let Some(ctx) = found else {
        return Err(f);
    };

    // SAFETY: frames are pushed from inside a `Context::with` closure (or a
    // host function call) and popped before that closure returns, so a frame
    // found on this thread's stack points at a `Ctx` that is still alive and
    // whose engine lock is held by this thread. `f` is generic over the
    // context lifetime and cannot let engine values escape.
    let ctx = unsafe { &*(ctx as *const Ctx<'static>) };
    Ok(f(ctx))
}

/// Whether any context of `session` is active on this thread.
pub(crate) fn is_active(session: u64) -> bool {
    ACTIVE.with(|frames| frames.borrow().iter().any(|frame| frame.session == session))
}
