// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Ownership of the completion handler and the operation body.
//!
//! A composed operation owns exactly one handler and one body, bundled in a
//! [`HandlerStorage`]. The body lives behind one of two strategies:
//!
//! * [`Inline`] — the body sits by value next to the handler and relocates
//!   with the operation every time it is handed off to a sub-operation. No
//!   allocation, but the body's address is not meaningful across
//!   suspensions.
//! * [`Stable`] — the body is constructed once into an allocator-obtained
//!   block ([`StableSlot`]) and never moves until the operation completes.
//!   Required whenever the body hands pointers to its own fields to
//!   sub-operations.
//!
//! Releasing the storage ([`HandlerStorage::release_and_bind`]) tears the
//! body storage down *first* and only then moves the handler out, so no
//! partially released state is ever observable.

use crate::{
    alloc::BodyAlloc,
    bind::{bind_front, BoundCompletion},
    error::{ComposeError, Result},
    handler::CompletionHandler,
};
use std::{
    alloc::Layout,
    fmt, mem,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// One allocator-backed block holding a `B` at a fixed address.
///
/// The slot itself may be moved freely; the `B` it points to never moves
/// between construction and drop. Zero-sized bodies never touch the
/// allocator.
pub struct StableSlot<B, A: BodyAlloc> {
    ptr: NonNull<B>,
    alloc: A,
}

/// Releases the block if body construction panics.
struct DeallocOnDrop<'a, A: BodyAlloc> {
    ptr: NonNull<u8>,
    layout: Layout,
    alloc: &'a A,
}

impl<A: BodyAlloc> Drop for DeallocOnDrop<'_, A> {
    fn drop(&mut self) {
        // Safety: the block came from `self.alloc` with `self.layout` and
        // holds no live value yet.
        unsafe { self.alloc.deallocate(self.ptr, self.layout) };
    }
}

impl<B, A: BodyAlloc> StableSlot<B, A> {
    /// Allocates a block from `alloc` and constructs `make()` into it.
    ///
    /// Allocation failure is reported synchronously; if `make` panics the
    /// block is released before the panic propagates.
    pub fn new(alloc: A, make: impl FnOnce() -> B) -> Result<StableSlot<B, A>> {
        let layout = Layout::new::<B>();
        if layout.size() == 0 {
            let ptr = NonNull::<B>::dangling();
            // Safety: a dangling aligned pointer is valid for zero-sized
            // writes.
            unsafe { ptr.as_ptr().write(make()) };
            return Ok(StableSlot { ptr, alloc });
        }

        let raw = alloc
            .allocate(layout)
            .ok_or(ComposeError::AllocationFailed {
                size: layout.size(),
            })?;
        let guard = DeallocOnDrop {
            ptr: raw,
            layout,
            alloc: &alloc,
        };
        let ptr = raw.cast::<B>();
        // Safety: freshly allocated for Layout::new::<B>().
        unsafe { ptr.as_ptr().write(make()) };
        mem::forget(guard);

        Ok(StableSlot { ptr, alloc })
    }

    /// The fixed address of the stored body.
    ///
    /// Valid for the slot's whole lifetime; sub-operations that need to
    /// refer back into the body may hold this pointer across suspensions.
    pub fn stable_ptr(&self) -> NonNull<B> {
        self.ptr
    }
}

impl<B, A: BodyAlloc> Deref for StableSlot<B, A> {
    type Target = B;

    fn deref(&self) -> &B {
        // Safety: the slot owns a live B for its whole lifetime.
        unsafe { self.ptr.as_ref() }
    }
}

impl<B, A: BodyAlloc> DerefMut for StableSlot<B, A> {
    fn deref_mut(&mut self) -> &mut B {
        // Safety: as above, and we have exclusive access.
        unsafe { self.ptr.as_mut() }
    }
}

impl<B, A: BodyAlloc> Drop for StableSlot<B, A> {
    fn drop(&mut self) {
        let layout = Layout::new::<B>();
        // Safety: the slot owns the value and the block.
        unsafe {
            self.ptr.as_ptr().drop_in_place();
            if layout.size() > 0 {
                self.alloc.deallocate(self.ptr.cast(), layout);
            }
        }
    }
}

impl<B: fmt::Debug, A: BodyAlloc> fmt::Debug for StableSlot<B, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableSlot").field("body", &**self).finish()
    }
}

/// Where an operation body lives between suspensions.
pub trait BodyStorage: Sized {
    /// The stored operation body.
    type Body;

    /// Shared access to the body.
    fn get(&self) -> &Self::Body;

    /// Exclusive access to the body.
    fn get_mut(&mut self) -> &mut Self::Body;

    /// Destroys the body and releases its storage. Called exactly once, at
    /// release time, before the handler is moved out.
    fn discard(self);
}

/// The relocatable strategy: the body moves together with the operation.
#[derive(Debug)]
pub struct Inline<B> {
    body: B,
}

impl<B> Inline<B> {
    pub(crate) fn new(body: B) -> Inline<B> {
        Inline { body }
    }
}

impl<B> BodyStorage for Inline<B> {
    type Body = B;

    fn get(&self) -> &B {
        &self.body
    }

    fn get_mut(&mut self) -> &mut B {
        &mut self.body
    }

    fn discard(self) {}
}

/// The address-stable strategy: the body lives in a [`StableSlot`].
#[derive(Debug)]
pub struct Stable<B, A: BodyAlloc> {
    slot: StableSlot<B, A>,
}

impl<B, A: BodyAlloc> Stable<B, A> {
    pub(crate) fn new(slot: StableSlot<B, A>) -> Stable<B, A> {
        Stable { slot }
    }

    /// The body's fixed address.
    pub fn stable_ptr(&self) -> NonNull<B> {
        self.slot.stable_ptr()
    }
}

impl<B, A: BodyAlloc> BodyStorage for Stable<B, A> {
    type Body = B;

    fn get(&self) -> &B {
        &self.slot
    }

    fn get_mut(&mut self) -> &mut B {
        &mut self.slot
    }

    fn discard(self) {}
}

/// Owns one completion handler and one operation body.
#[derive(Debug)]
pub struct HandlerStorage<H, S> {
    handler: H,
    body: S,
}

impl<H, S> HandlerStorage<H, S>
where
    H: CompletionHandler,
    S: BodyStorage,
{
    pub(crate) fn new(handler: H, body: S) -> HandlerStorage<H, S> {
        HandlerStorage { handler, body }
    }

    /// The stored completion handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Exclusive access to the stored completion handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The stored operation body.
    pub fn value(&self) -> &S::Body {
        self.body.get()
    }

    /// Exclusive access to the stored operation body.
    pub fn value_mut(&mut self) -> &mut S::Body {
        self.body.get_mut()
    }

    /// Whether the body is still present. Release consumes the storage, so
    /// a live `HandlerStorage` always holds its value; the method exists
    /// for symmetry with runtimes that inspect storage state.
    pub fn has_value(&self) -> bool {
        true
    }

    pub(crate) fn body_storage(&self) -> &S {
        &self.body
    }

    /// Destroys the body, releases its storage, and moves the handler out
    /// with `prefix` bound at the front of its argument list.
    ///
    /// The two steps are not separately observable: by the time the
    /// returned [`BoundCompletion`] exists, the body and its block are
    /// gone.
    pub fn release_and_bind<P>(self, prefix: P) -> BoundCompletion<H, P> {
        self.body.discard();
        bind_front(self.handler, prefix)
    }
}
