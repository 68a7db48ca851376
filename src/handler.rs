// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Completion handlers and their associated capabilities.
//!
//! A completion handler is the user-supplied callback a composed operation
//! invokes exactly once with its final result. Besides the callback itself,
//! a handler carries two associations that the operation resolves once at
//! construction: an allocator, used for address-stable body storage, and an
//! optional preferred executor, which the terminal upcall is posted to
//! instead of the I/O executor the operation was initiated on.
//!
//! Plain closures become handlers through [`handler_fn`]; associations are
//! overridden by wrapping with [`with_allocator`] and [`with_executor`].

use crate::{
    alloc::{BodyAlloc, RecyclingAlloc},
    executor::ExecutorHandle,
};
use std::{fmt, marker::PhantomData};

/// A user completion callback plus its associated capabilities.
///
/// `complete` consumes the handler, making double invocation
/// unrepresentable.
pub trait CompletionHandler: Sized {
    /// The final result the handler is invoked with. Multi-argument results
    /// are expressed as tuples.
    type Result;

    /// Allocator used for address-stable operation bodies initiated with
    /// this handler.
    type Alloc: BodyAlloc;

    /// Delivers the final result. Invoked exactly once per composed
    /// operation.
    fn complete(self, result: Self::Result);

    /// The associated allocator, resolved once at operation construction.
    fn allocator(&self) -> Self::Alloc;

    /// The associated executor, if this handler prefers one over the
    /// executor the operation was initiated on.
    fn preferred_executor(&self) -> Option<ExecutorHandle> {
        None
    }
}

/// Adapts a plain `FnOnce(R)` closure into a [`CompletionHandler`] with the
/// default (recycling) allocator and no preferred executor.
pub fn handler_fn<F, R>(f: F) -> HandlerFn<F, R>
where
    F: FnOnce(R),
{
    HandlerFn {
        f,
        _result: PhantomData,
    }
}

/// See [`handler_fn`].
pub struct HandlerFn<F, R> {
    f: F,
    _result: PhantomData<fn(R)>,
}

impl<F, R> CompletionHandler for HandlerFn<F, R>
where
    F: FnOnce(R),
{
    type Result = R;
    type Alloc = RecyclingAlloc;

    fn complete(self, result: R) {
        (self.f)(result)
    }

    fn allocator(&self) -> RecyclingAlloc {
        RecyclingAlloc
    }
}

impl<F, R> fmt::Debug for HandlerFn<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn { .. }")
    }
}

/// Associates `alloc` with `handler`, overriding the allocator used for
/// stable body storage.
pub fn with_allocator<H, A>(handler: H, alloc: A) -> WithAllocator<H, A>
where
    H: CompletionHandler,
    A: BodyAlloc,
{
    WithAllocator { handler, alloc }
}

/// See [`with_allocator`].
#[derive(Debug)]
pub struct WithAllocator<H, A> {
    handler: H,
    alloc: A,
}

impl<H, A> CompletionHandler for WithAllocator<H, A>
where
    H: CompletionHandler,
    A: BodyAlloc,
{
    type Result = H::Result;
    type Alloc = A;

    fn complete(self, result: Self::Result) {
        self.handler.complete(result)
    }

    fn allocator(&self) -> A {
        self.alloc.clone()
    }

    fn preferred_executor(&self) -> Option<ExecutorHandle> {
        self.handler.preferred_executor()
    }
}

/// Associates `ex` with `handler`. The composed operation's work guard
/// binds to `ex`, and the terminal upcall is posted there, regardless of
/// which executor the operation was initiated on.
pub fn with_executor<H>(handler: H, ex: ExecutorHandle) -> WithExecutor<H>
where
    H: CompletionHandler,
{
    WithExecutor { handler, ex }
}

/// See [`with_executor`].
pub struct WithExecutor<H> {
    handler: H,
    ex: ExecutorHandle,
}

impl<H> CompletionHandler for WithExecutor<H>
where
    H: CompletionHandler,
{
    type Result = H::Result;
    type Alloc = H::Alloc;

    fn complete(self, result: Self::Result) {
        self.handler.complete(result)
    }

    fn allocator(&self) -> H::Alloc {
        self.handler.allocator()
    }

    fn preferred_executor(&self) -> Option<ExecutorHandle> {
        Some(self.ex.clone())
    }
}

impl<H: fmt::Debug> fmt::Debug for WithExecutor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithExecutor")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{alloc::SystemAlloc, executor::LocalExecutor};
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn handler_fn_delivers_the_result() {
        let seen = Rc::new(Cell::new(0u32));
        let handler = {
            let seen = seen.clone();
            handler_fn(move |value: u32| seen.set(value))
        };
        handler.complete(7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn allocator_association_is_overridable() {
        let handler = with_allocator(handler_fn(|_: ()| {}), SystemAlloc);
        let _alloc: SystemAlloc = handler.allocator();
    }

    #[test]
    fn executor_association_defaults_to_none() {
        assert!(handler_fn(|_: ()| {}).preferred_executor().is_none());
    }

    #[test]
    fn executor_association_is_overridable() {
        let ex = LocalExecutor::new();
        let handler = with_executor(handler_fn(|_: ()| {}), ex.handle());
        assert!(handler.preferred_executor().is_some());
    }
}
