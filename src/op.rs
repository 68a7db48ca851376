// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! The composed operation itself: lifecycle, continuation tokens and the
//! upcall dispatch protocol.
//!
//! A [`ComposedOp`] glues together the handler storage, a work guard on the
//! resolved executor, and the issuance of single-use [`YieldToken`]s. The
//! host runtime never sees the operation body directly: it holds the
//! operation as the completion callback of whatever sub-operation is in
//! flight, and re-invokes it (through [`ComposedOp::continue_with`]) when
//! that sub-operation finishes.
//!
//! Completion goes through one of two paths. A *posted* upcall defers the
//! handler through the executor's queue; a *direct* upcall invokes it on
//! the current stack. [`YieldToken::upcall`] picks between them: an
//! operation that completes on its very first invocation must never call
//! back on the initiating stack (the initiating call has not returned yet),
//! so it posts; once the operation is a genuine continuation the direct
//! path is safe and skips a scheduling hop.

use crate::{
    executor::{running_in_context, ExecutorHandle},
    handler::CompletionHandler,
    storage::{BodyStorage, HandlerStorage},
};
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Keep-alive on the executor a composed operation completes through.
///
/// Acquired when the operation is constructed and released exactly once,
/// immediately before the completion handler runs, so the context may shut
/// down as soon as the handler returns. Move-only; dropping an armed guard
/// (an operation discarded before completing) releases the keep-alive too.
pub struct WorkGuard {
    ex: ExecutorHandle,
    active: bool,
}

impl WorkGuard {
    pub(crate) fn new(ex: ExecutorHandle) -> WorkGuard {
        ex.work_started();
        WorkGuard { ex, active: true }
    }

    /// The executor this guard keeps alive.
    pub fn executor(&self) -> &ExecutorHandle {
        &self.ex
    }

    pub(crate) fn release(&mut self) {
        debug_assert!(self.active, "work guard released twice");
        if self.active {
            self.active = false;
            self.ex.work_finished();
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.active {
            log::warn!("composed operation discarded before completion; releasing its work");
            self.active = false;
            self.ex.work_finished();
        }
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGuard")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Tag returned by every destructive token action.
///
/// Carries no payload; its only purpose is to force the operation body to
/// `return` immediately after handing off or completing, before it can
/// touch now-released state.
#[must_use = "return the upcall guard from the operation body immediately"]
#[derive(Debug)]
pub struct UpcallGuard {
    _priv: (),
}

impl UpcallGuard {
    pub(crate) fn new() -> UpcallGuard {
        UpcallGuard { _priv: () }
    }
}

/// A multi-step operation body.
///
/// Invoked once per step: first by [`PendingOp::run`] with the initial
/// step, then by the runtime (through [`ComposedOp::continue_with`]) with
/// each sub-operation's result. Sub-operations that deliver different
/// result shapes are folded into one `Step` enum and matched inside
/// `resume`.
///
/// `resume` is generic over the storage strategy, so one body type works
/// with both [`inline_transform`](crate::inline_transform) and
/// [`stable_transform`](crate::stable_transform); the token's `Deref` gives
/// the body access to its own fields either way.
pub trait OperationBody<H: CompletionHandler>: Sized {
    /// Argument delivered at each resumption.
    type Step;

    /// Runs one step. Must end with exactly one destructive token action:
    /// a hand-off to a sub-operation or an upcall.
    fn resume<S>(token: YieldToken<S, H>, step: Self::Step) -> UpcallGuard
    where
        S: BodyStorage<Body = Self> + 'static;
}

pub(crate) type StepOf<S, H> = <<S as BodyStorage>::Body as OperationBody<H>>::Step;

/// One in-flight multi-step asynchronous operation.
///
/// Owns the handler storage and the work guard. Between construction and
/// the terminal upcall the runtime invokes it at most once at a time;
/// serialization is the executor's job, and no internal locking exists.
pub struct ComposedOp<S, H> {
    storage: HandlerStorage<H, S>,
    guard: WorkGuard,
}

impl<S, H> ComposedOp<S, H>
where
    S: BodyStorage,
    S::Body: OperationBody<H>,
    H: CompletionHandler,
{
    pub(crate) fn new(handler: H, io_ex: &ExecutorHandle, body: S) -> ComposedOp<S, H> {
        let ex = handler
            .preferred_executor()
            .unwrap_or_else(|| io_ex.clone());
        let guard = WorkGuard::new(ex);
        ComposedOp {
            storage: HandlerStorage::new(handler, body),
            guard,
        }
    }

    pub(crate) fn invoke(self, is_continuation: bool, step: StepOf<S, H>)
    where
        S: 'static,
    {
        let token = YieldToken {
            op: self,
            is_continuation,
        };
        let _guard = <S::Body as OperationBody<H>>::resume(token, step);
    }

    /// Re-enters the operation body with a sub-operation's result. This is
    /// the runtime's entry point; the issued token reports itself as a
    /// continuation.
    pub fn continue_with(self, step: StepOf<S, H>)
    where
        S: 'static,
    {
        log::trace!("composed operation resumed as a continuation");
        self.invoke(true, step);
    }

    /// Adapts the operation into a plain callback for a sub-operation
    /// whose result type is already the body's step type.
    pub fn into_callback(self) -> impl FnOnce(StepOf<S, H>)
    where
        S: 'static,
    {
        move |step| self.continue_with(step)
    }

    /// Adapts the operation into a callback for a sub-operation delivering
    /// `T`, tagging the result through `map`. This is how a body that
    /// issues different kinds of sub-operations routes each completion to
    /// the right arm of its step enum.
    pub fn map_step<T, F>(self, map: F) -> impl FnOnce(T)
    where
        S: 'static,
        F: FnOnce(T) -> StepOf<S, H>,
    {
        move |value| self.continue_with(map(value))
    }

    /// The executor the operation completes through, forwarded from the
    /// wrapped completion handler.
    pub fn executor(&self) -> &ExecutorHandle {
        self.guard.executor()
    }

    /// The allocator associated with the wrapped completion handler.
    pub fn allocator(&self) -> H::Alloc {
        self.storage.handler().allocator()
    }

    pub(crate) fn body_storage(&self) -> &S {
        self.storage.body_storage()
    }

    fn post_upcall(self, result: H::Result) -> UpcallGuard
    where
        H: 'static,
        H::Result: 'static,
    {
        let ComposedOp { storage, mut guard } = self;
        let bound = storage.release_and_bind(result);
        let ex = guard.executor().clone();
        log::trace!("posting terminal upcall");
        ex.post(Box::new(move || {
            guard.release();
            bound.invoke();
        }));
        UpcallGuard::new()
    }

    fn direct_upcall(self, result: H::Result) -> UpcallGuard {
        let ComposedOp { storage, mut guard } = self;
        let bound = storage.release_and_bind(result);
        guard.release();
        log::trace!("performing direct terminal upcall");
        bound.invoke();
        UpcallGuard::new()
    }
}

impl<S, H> fmt::Debug for ComposedOp<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedOp").finish_non_exhaustive()
    }
}

/// Single-use capability representing the current suspension point of one
/// in-flight composed operation.
///
/// Dereferences to the operation body, so body code reaches its own fields
/// through the token. Every consuming method is terminal: after a hand-off
/// or an upcall the token is gone and the body must return the resulting
/// [`UpcallGuard`] immediately.
pub struct YieldToken<S, H> {
    op: ComposedOp<S, H>,
    is_continuation: bool,
}

impl<S, H> YieldToken<S, H>
where
    S: BodyStorage,
    S::Body: OperationBody<H>,
    H: CompletionHandler,
{
    /// Whether the current invocation is the executor re-invoking the
    /// operation as a continuation of prior work.
    pub fn is_continuation(&self) -> bool {
        self.is_continuation
    }

    /// The executor the operation completes through.
    pub fn executor(&self) -> &ExecutorHandle {
        self.op.executor()
    }

    /// Releases ownership of the composed operation for use as the
    /// completion callback of a sub-operation, paired with the guard the
    /// body must return.
    pub fn hand_off(self) -> (ComposedOp<S, H>, UpcallGuard) {
        log::trace!("composed operation handed off to a sub-operation");
        (self.op, UpcallGuard::new())
    }

    /// Hands the operation off through `initiate`, which must pass it (or
    /// an adapter made with [`ComposedOp::into_callback`] /
    /// [`ComposedOp::map_step`]) to exactly one sub-operation.
    pub fn suspend<F>(self, initiate: F) -> UpcallGuard
    where
        F: FnOnce(ComposedOp<S, H>),
    {
        let (op, guard) = self.hand_off();
        initiate(op);
        guard
    }

    /// Completes the operation by scheduling the handler through the
    /// executor's deferred queue. Always safe.
    pub fn post_upcall(self, result: H::Result) -> UpcallGuard
    where
        H: 'static,
        H::Result: 'static,
    {
        self.op.post_upcall(result)
    }

    /// Completes the operation by invoking the handler on the current
    /// stack.
    ///
    /// Precondition: the current invocation is a continuation and the
    /// current thread is running inside the handler's executor context.
    /// Both are checked in debug builds; violating them in release builds
    /// means the handler runs on the initiating stack, which the
    /// asynchronous-completion contract forbids.
    pub fn direct_upcall(self, result: H::Result) -> UpcallGuard {
        debug_assert!(
            self.is_continuation,
            "direct upcall outside a continuation; use post_upcall instead"
        );
        debug_assert!(
            running_in_context(self.op.executor()),
            "direct upcall outside the completion handler's executor context"
        );
        self.op.direct_upcall(result)
    }

    /// Completes the operation, choosing the upcall path by continuation
    /// state: direct when resumed as a continuation, posted on a first
    /// (synchronous) completion.
    pub fn upcall(self, result: H::Result) -> UpcallGuard
    where
        H: 'static,
        H::Result: 'static,
    {
        if self.is_continuation {
            self.direct_upcall(result)
        } else {
            self.post_upcall(result)
        }
    }
}

impl<S, H> Deref for YieldToken<S, H>
where
    S: BodyStorage,
    H: CompletionHandler,
{
    type Target = S::Body;

    fn deref(&self) -> &S::Body {
        self.op.storage.value()
    }
}

impl<S, H> DerefMut for YieldToken<S, H>
where
    S: BodyStorage,
    H: CompletionHandler,
{
    fn deref_mut(&mut self) -> &mut S::Body {
        self.op.storage.value_mut()
    }
}

impl<S, H> fmt::Debug for YieldToken<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YieldToken")
            .field("is_continuation", &self.is_continuation)
            .finish_non_exhaustive()
    }
}

/// A constructed, not-yet-started composed operation.
///
/// Exists so an operation cannot accidentally be resumed as a continuation
/// before it ever ran: the only way in is [`run`](PendingOp::run), which
/// issues a non-continuation token.
#[must_use = "a composed operation does nothing until run"]
pub struct PendingOp<S, H> {
    op: ComposedOp<S, H>,
}

impl<S, H> PendingOp<S, H>
where
    S: BodyStorage,
    S::Body: OperationBody<H>,
    H: CompletionHandler,
{
    pub(crate) fn new(op: ComposedOp<S, H>) -> PendingOp<S, H> {
        PendingOp { op }
    }

    /// Starts the operation with the initial step. The issued token is not
    /// a continuation, so a body that completes immediately will post its
    /// upcall rather than invoke the handler on this stack.
    pub fn run(self, first: StepOf<S, H>)
    where
        S: 'static,
    {
        log::trace!("composed operation started");
        self.op.invoke(false, first);
    }

    /// The executor the operation will complete through.
    pub fn executor(&self) -> &ExecutorHandle {
        self.op.executor()
    }
}

impl<B, A, H> PendingOp<crate::storage::Stable<B, A>, H>
where
    A: crate::alloc::BodyAlloc,
    B: OperationBody<H>,
    H: CompletionHandler,
{
    /// The fixed address of the address-stable operation body. Identical
    /// across every suspension until the operation completes.
    pub fn stable_ptr(&self) -> std::ptr::NonNull<B> {
        self.op.body_storage().stable_ptr()
    }
}

impl<S, H> fmt::Debug for PendingOp<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOp").finish_non_exhaustive()
    }
}
