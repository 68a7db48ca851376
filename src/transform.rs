// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Initiation: transforming an operation body into a composed operation.
//!
//! The caller supplies a completion handler, the executor the operation is
//! initiated on, and the body; the transform resolves the handler's
//! associations (preferred executor, allocator), acquires the work guard
//! and returns a [`PendingOp`] that must be explicitly started.
//!
//! Choose [`stable_transform`] (or [`stable_transform_with`]) whenever the
//! body hands references to its own fields to sub-operations; otherwise
//! [`inline_transform`] avoids the allocation.

use crate::{
    error::Result,
    executor::ExecutorHandle,
    handler::CompletionHandler,
    op::{ComposedOp, OperationBody, PendingOp},
    storage::{Inline, Stable, StableSlot},
};

/// Composes `body` with the relocatable (inline) storage strategy: the
/// body moves together with the operation on every hand-off and no extra
/// allocation is made.
///
/// # Examples
///
/// ```
/// use compose::{
///     handler_fn, inline_transform, BodyStorage, CompletionHandler, LocalExecutor,
///     OperationBody, UpcallGuard, YieldToken,
/// };
///
/// struct Echo;
///
/// impl<H> OperationBody<H> for Echo
/// where
///     H: CompletionHandler<Result = u32> + 'static,
/// {
///     type Step = u32;
///
///     fn resume<S>(token: YieldToken<S, H>, step: u32) -> UpcallGuard
///     where
///         S: BodyStorage<Body = Self> + 'static,
///     {
///         token.upcall(step)
///     }
/// }
///
/// let ex = LocalExecutor::new();
/// inline_transform(&ex.handle(), handler_fn(|v: u32| assert_eq!(v, 3)), Echo).run(3);
/// ex.run();
/// ```
pub fn inline_transform<B, H>(ex: &ExecutorHandle, handler: H, body: B) -> PendingOp<Inline<B>, H>
where
    B: OperationBody<H>,
    H: CompletionHandler,
{
    PendingOp::new(ComposedOp::new(handler, ex, Inline::new(body)))
}

/// Composes `body` with the address-stable storage strategy: the body is
/// moved exactly once, into a block obtained from the handler's associated
/// allocator, and stays at that address until the operation completes.
///
/// Allocation failure is reported synchronously, before any asynchronous
/// work starts.
pub fn stable_transform<B, H>(
    ex: &ExecutorHandle,
    handler: H,
    body: B,
) -> Result<PendingOp<Stable<B, H::Alloc>, H>>
where
    B: OperationBody<H>,
    H: CompletionHandler,
{
    stable_transform_with(ex, handler, move || body)
}

/// Like [`stable_transform`], but the body is constructed by `make` after
/// its block has been allocated, for bodies that are expensive to move or
/// whose construction depends on the initiation site.
pub fn stable_transform_with<B, H, F>(
    ex: &ExecutorHandle,
    handler: H,
    make: F,
) -> Result<PendingOp<Stable<B, H::Alloc>, H>>
where
    B: OperationBody<H>,
    H: CompletionHandler,
    F: FnOnce() -> B,
{
    let slot = StableSlot::new(handler.allocator(), make)?;
    Ok(PendingOp::new(ComposedOp::new(
        handler,
        ex,
        Stable::new(slot),
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        executor::LocalExecutor,
        handler::{handler_fn, with_allocator},
        op::{UpcallGuard, YieldToken},
        storage::BodyStorage,
        ComposeError,
    };
    use std::{alloc::Layout, cell::Cell, ptr::NonNull, rc::Rc};

    struct Echo;

    impl<H> crate::OperationBody<H> for Echo
    where
        H: CompletionHandler<Result = u32> + 'static,
    {
        type Step = u32;

        fn resume<S>(token: YieldToken<S, H>, step: u32) -> UpcallGuard
        where
            S: BodyStorage<Body = Self> + 'static,
        {
            token.upcall(step)
        }
    }

    struct Counted {
        count: u64,
    }

    impl<H> crate::OperationBody<H> for Counted
    where
        H: CompletionHandler<Result = u32> + 'static,
    {
        type Step = u32;

        fn resume<S>(token: YieldToken<S, H>, step: u32) -> UpcallGuard
        where
            S: BodyStorage<Body = Self> + 'static,
        {
            let bias = token.count as u32;
            token.upcall(step + bias)
        }
    }

    #[test]
    fn stable_transform_reports_the_body_address() {
        let ex = LocalExecutor::new();
        let pending =
            stable_transform(&ex.handle(), handler_fn(|_: u32| {}), Counted { count: 1 }).unwrap();
        let ptr = pending.stable_ptr();
        assert_ne!(ptr, NonNull::dangling());
        drop(pending);
        ex.run();
    }

    #[derive(Clone)]
    struct ExhaustedAlloc;

    impl crate::BodyAlloc for ExhaustedAlloc {
        fn allocate(&self, _layout: Layout) -> Option<NonNull<u8>> {
            None
        }

        unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
    }

    #[test]
    fn stable_allocation_failure_reaches_the_initiator() {
        let ex = LocalExecutor::new();
        let handler = with_allocator(handler_fn(|_: u32| {}), ExhaustedAlloc);
        // A body with actual storage, so the allocator is consulted.
        struct Wide {
            _pad: [u64; 4],
        }
        impl<H> crate::OperationBody<H> for Wide
        where
            H: CompletionHandler<Result = u32> + 'static,
        {
            type Step = u32;

            fn resume<S>(token: YieldToken<S, H>, step: u32) -> UpcallGuard
            where
                S: BodyStorage<Body = Self> + 'static,
            {
                token.upcall(step)
            }
        }

        let err = stable_transform(&ex.handle(), handler, Wide { _pad: [0; 4] }).unwrap_err();
        assert!(matches!(err, ComposeError::AllocationFailed { size: 32 }));
        assert_eq!(ex.outstanding_work(), 0);
    }

    #[test]
    fn stable_transform_with_constructs_after_allocation() {
        let ex = LocalExecutor::new();
        let constructed = Rc::new(Cell::new(false));
        let make = {
            let constructed = constructed.clone();
            move || {
                constructed.set(true);
                Echo
            }
        };
        let pending = stable_transform_with(&ex.handle(), handler_fn(|_: u32| {}), make).unwrap();
        assert!(constructed.get());
        pending.run(9);
        ex.run();
    }
}
