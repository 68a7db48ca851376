// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Future-based completion: await a composed operation instead of
//! supplying a callback.
//!
//! [`completion_future`] produces a handler/future pair. The handler is
//! initiated like any other completion handler; the future resolves with
//! the final result once the terminal upcall runs. Single-threaded, like
//! the rest of the crate: the pair shares state through an `Rc` and the
//! future is only woken from the same thread.

use crate::{alloc::RecyclingAlloc, handler::CompletionHandler};
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

struct Shared<R> {
    result: Option<R>,
    waker: Option<Waker>,
}

/// Creates a connected handler/future pair for one composed operation.
///
/// # Examples
///
/// ```
/// use compose::{
///     completion_future, inline_transform, BodyStorage, CompletionHandler, LocalExecutor,
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
/// let (handler, result) = completion_future::<u32>();
/// inline_transform(&ex.handle(), handler, Echo).run(12);
/// ex.run();
/// assert_eq!(futures_lite::future::block_on(result), 12);
/// ```
pub fn completion_future<R>() -> (FutureHandler<R>, CompletionFuture<R>) {
    let shared = Rc::new(RefCell::new(Shared {
        result: None,
        waker: None,
    }));
    (
        FutureHandler {
            shared: shared.clone(),
        },
        CompletionFuture { shared },
    )
}

/// The handler half of [`completion_future`].
pub struct FutureHandler<R> {
    shared: Rc<RefCell<Shared<R>>>,
}

impl<R> CompletionHandler for FutureHandler<R> {
    type Result = R;
    type Alloc = RecyclingAlloc;

    fn complete(self, result: R) {
        let mut shared = self.shared.borrow_mut();
        shared.result = Some(result);
        if let Some(waker) = shared.waker.take() {
            waker.wake();
        }
    }

    fn allocator(&self) -> RecyclingAlloc {
        RecyclingAlloc
    }
}

impl<R> fmt::Debug for FutureHandler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FutureHandler { .. }")
    }
}

/// The future half of [`completion_future`]. Resolves with the operation's
/// final result.
pub struct CompletionFuture<R> {
    shared: Rc<RefCell<Shared<R>>>,
}

impl<R> Future for CompletionFuture<R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        let mut shared = self.shared.borrow_mut();
        match shared.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                shared.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<R> fmt::Debug for CompletionFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ready = self.shared.borrow().result.is_some();
        f.debug_struct("CompletionFuture").field("ready", &ready).finish()
    }
}
