// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! The reentrant state machine convention for operation bodies.
//!
//! An operation body is an ordinary function invoked repeatedly; a
//! [`Coroutine`] embedded in the body records which suspension point to
//! resume at, so the body reads as a small labeled state machine:
//!
//! ```
//! use compose::Coroutine;
//!
//! struct Body {
//!     coro: Coroutine,
//! }
//!
//! # fn issue_sub_operation() {}
//! impl Body {
//!     fn step(&mut self) {
//!         match self.coro.enter() {
//!             0 => {
//!                 // first invocation; issue a sub-operation and suspend.
//!                 self.coro.suspend(1);
//!                 issue_sub_operation();
//!             }
//!             1 => {
//!                 // resumed after the sub-operation completed. Falling
//!                 // through without suspending leaves the state machine
//!                 // complete.
//!             }
//!             _ => unreachable!(),
//!         }
//!     }
//! }
//! # let mut b = Body { coro: Coroutine::new() };
//! # b.step();
//! # b.step();
//! # assert!(b.coro.is_complete());
//! ```
//!
//! [`enter`](Coroutine::enter) pre-arms the completed sentinel: a body that
//! returns without calling [`suspend`](Coroutine::suspend) — whether by
//! falling off the end of its final state or by taking an explicit early
//! exit — is complete and must never be entered again. Entering a
//! completed state machine panics; it means the runtime delivered a
//! completion for an operation that already finished.

/// Resumption state of one operation body.
///
/// `0` means not started, a positive value names the suspension point to
/// resume at, and a negative value means complete.
#[derive(Debug, Default)]
pub struct Coroutine {
    state: i32,
}

const COMPLETE: i32 = -1;

impl Coroutine {
    /// A state machine at its initial (not started) state.
    pub const fn new() -> Coroutine {
        Coroutine { state: 0 }
    }

    /// Dispatches one invocation: returns the label to resume at and
    /// pre-arms the completed sentinel. A following call to
    /// [`suspend`](Coroutine::suspend) re-arms the state machine instead.
    ///
    /// # Panics
    ///
    /// Panics if the state machine already completed. That state is final;
    /// the optimizer and the storage release logic rely on it.
    pub fn enter(&mut self) -> i32 {
        assert!(
            self.state >= 0,
            "operation body entered after completion (corrupt resumption state)"
        );
        let at = self.state;
        self.state = COMPLETE;
        at
    }

    /// Records `label` as the point to resume at on the next invocation.
    /// Call before returning from the current state's block.
    ///
    /// # Panics
    ///
    /// Panics if `label` is not positive; `0` and negative values are
    /// reserved for the not-started and completed states.
    pub fn suspend(&mut self, label: i32) {
        assert!(label > 0, "suspension labels must be positive");
        self.state = label;
    }

    /// Whether the state machine ran to completion.
    pub fn is_complete(&self) -> bool {
        self.state < 0
    }

    /// Whether the state machine suspended at least once and is waiting to
    /// be resumed.
    pub fn is_started(&self) -> bool {
        self.state > 0
    }
}
