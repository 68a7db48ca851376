// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! # Compose - multi-step asynchronous operations for executor-based runtimes.
//!
//! ## What is this crate
//!
//! An asynchronous operation frequently needs to issue *other* asynchronous
//! operations before it can report a result: resolve, then connect, then
//! handshake; or wait on a timer N times in a loop. This crate is the
//! lifecycle plumbing for such *composed operations* on callback-driven,
//! executor-based runtimes: it keeps the operation's state alive (and, when
//! asked, at a stable address) across suspension points, threads the
//! caller's completion handler, executor and allocator through every step,
//! and guarantees the final completion callback runs exactly once, off the
//! initiating stack, no matter how many intermediate steps there were.
//!
//! It does not implement I/O, timers or a run loop of its own (a minimal
//! [`LocalExecutor`] is included for driving operations deterministically,
//! mostly in tests); any runtime that can schedule a deferred task can host
//! it by implementing the three-method [`Executor`] trait.
//!
//! ## Anatomy of a composed operation
//!
//! * You write an [`OperationBody`]: a struct holding the operation's
//!   state, with a single `resume` entry point invoked once per step.
//! * A transform ([`inline_transform`] or [`stable_transform`]) binds the
//!   body to a [`CompletionHandler`] and an executor, producing a
//!   [`PendingOp`] that is started explicitly with `run`.
//! * Inside `resume`, a single-use [`YieldToken`] represents the current
//!   suspension point. The body either *hands the whole operation off* as
//!   the completion callback of the next sub-operation, or performs the
//!   terminal *upcall* to the completion handler. Both are destructive and
//!   return a [`UpcallGuard`] the body must return immediately.
//! * A [`Coroutine`] field gives the body resumable-function structure: a
//!   small integer selects the arm to resume at, so multi-step logic reads
//!   as a labeled state machine.
//!
//! ## Example: five sequential waits
//!
//! ```
//! use compose::{
//!     handler_fn, inline_transform, BodyStorage, CompletionHandler, Coroutine,
//!     ExecutorHandle, LocalExecutor, OperationBody, UpcallGuard, YieldToken,
//! };
//! use std::{cell::RefCell, rc::Rc};
//!
//! /// Waits for `remaining` ticks of a (simulated) timer, then completes.
//! struct WaitTicks {
//!     ex: ExecutorHandle,
//!     remaining: u32,
//!     coro: Coroutine,
//! }
//!
//! impl<H> OperationBody<H> for WaitTicks
//! where
//!     H: CompletionHandler<Result = Result<(), &'static str>> + 'static,
//! {
//!     type Step = Result<(), &'static str>;
//!
//!     fn resume<S>(mut token: YieldToken<S, H>, step: Self::Step) -> UpcallGuard
//!     where
//!         S: BodyStorage<Body = Self> + 'static,
//!     {
//!         if let Err(e) = step {
//!             // A failed sub-operation takes the early exit.
//!             return token.upcall(Err(e));
//!         }
//!         match token.coro.enter() {
//!             0 | 1 => {
//!                 if token.remaining == 0 {
//!                     return token.upcall(Ok(()));
//!                 }
//!                 token.remaining -= 1;
//!                 token.coro.suspend(1);
//!                 let ex = token.ex.clone();
//!                 token.suspend(move |op| {
//!                     // A real body would initiate e.g. timer.async_wait
//!                     // here, with `op` as its completion callback.
//!                     ex.post(Box::new(move || op.continue_with(Ok(()))));
//!                 })
//!             }
//!             _ => unreachable!("corrupt resumption state"),
//!         }
//!     }
//! }
//!
//! let ex = LocalExecutor::new();
//! let done = Rc::new(RefCell::new(None));
//! let handler = {
//!     let done = done.clone();
//!     handler_fn(move |r: Result<(), &'static str>| *done.borrow_mut() = Some(r))
//! };
//! let body = WaitTicks {
//!     ex: ex.handle(),
//!     remaining: 5,
//!     coro: Coroutine::new(),
//! };
//! inline_transform(&ex.handle(), handler, body).run(Ok(()));
//! ex.run();
//! assert_eq!(*done.borrow(), Some(Ok(())));
//! ```
//!
//! ## Storage strategies
//!
//! With [`inline_transform`] the body moves together with the operation
//! every time it is handed off; cheap, but the body's address changes. If
//! the body gives sub-operations pointers into itself — a read buffer, an
//! intrusive node — use [`stable_transform`]: the body is placed once into
//! a block from the handler's associated allocator and never moves until
//! the operation completes.
//!
//! ## Upcall dispatch
//!
//! [`YieldToken::upcall`] completes the operation through one of two
//! paths. If the body is completing on its very first invocation the
//! handler is *posted* through the executor, never invoked on the
//! initiating stack; once the operation is resumed as a genuine
//! continuation the handler is invoked *directly*, skipping a scheduling
//! hop. The work guard held since construction is released immediately
//! before the handler runs, so an executor tracking outstanding work may
//! shut down right after.

#![warn(missing_docs, missing_debug_implementations)]

pub mod alloc;
pub mod bind;
pub mod coroutine;
pub mod error;
pub mod executor;
pub mod future;
pub mod handler;
pub mod op;
pub mod storage;
pub mod transform;

pub use crate::{
    alloc::{BodyAlloc, RecyclingAlloc, SystemAlloc},
    bind::{bind_front, BoundCompletion, Prepend},
    coroutine::Coroutine,
    error::{ComposeError, Result},
    executor::{running_in_context, ContextId, Executor, ExecutorHandle, LocalExecutor, Task},
    future::{completion_future, CompletionFuture, FutureHandler},
    handler::{
        handler_fn, with_allocator, with_executor, CompletionHandler, HandlerFn, WithAllocator,
        WithExecutor,
    },
    op::{ComposedOp, OperationBody, PendingOp, UpcallGuard, WorkGuard, YieldToken},
    storage::{BodyStorage, HandlerStorage, Inline, Stable, StableSlot},
    transform::{inline_transform, stable_transform, stable_transform_with},
};
