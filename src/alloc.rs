// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Allocator capabilities for address-stable operation storage.
//!
//! A stable operation body lives in exactly one heap block from initiation
//! until the terminal upcall. The block is obtained through the allocator
//! associated with the completion handler, so callers that run many
//! operations can plug in a pooling strategy. Two implementations are
//! provided: [`SystemAlloc`], a global-allocator pass-through, and
//! [`RecyclingAlloc`], which caches recently released blocks in a small
//! thread-local free list. Composed operations allocate and free blocks of
//! the same handful of sizes at high frequency, which is exactly the access
//! pattern a recycling cache serves well.

use std::{
    alloc::Layout,
    cell::RefCell,
    ptr::NonNull,
};

/// Allocate and release single blocks of storage for operation bodies.
///
/// Implementations are resolved once, at composed-operation construction,
/// from [`CompletionHandler::allocator`](crate::CompletionHandler::allocator)
/// and are cloned into the storage that owns the block.
pub trait BodyAlloc: Clone {
    /// Allocates one block for `layout`, or `None` if storage is exhausted.
    ///
    /// `layout` always has non-zero size; zero-sized bodies never reach the
    /// allocator.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from a call to `allocate` on an allocator sharing
    /// this allocator's pool, with the same `layout`, and must not be used
    /// afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Global-allocator pass-through.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAlloc;

impl BodyAlloc for SystemAlloc {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // Safety: layout has non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

const CACHE_SLOTS: usize = 8;

struct Pool {
    blocks: Vec<(NonNull<u8>, Layout)>,
}

impl Pool {
    fn take(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let pos = self.blocks.iter().position(|(_, l)| *l == layout)?;
        Some(self.blocks.swap_remove(pos).0)
    }

    fn put(&mut self, ptr: NonNull<u8>, layout: Layout) -> bool {
        if self.blocks.len() < CACHE_SLOTS {
            self.blocks.push((ptr, layout));
            true
        } else {
            false
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for (ptr, layout) in self.blocks.drain(..) {
            // Safety: every cached block came from the global allocator
            // with the recorded layout.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

thread_local! {
    static POOL: RefCell<Pool> = RefCell::new(Pool { blocks: Vec::new() });
}

/// The default body allocator: a thread-local cache of recently released
/// blocks, falling back to the global allocator on a miss.
///
/// The cache holds at most a few blocks and matches on exact layout, so
/// repeated initiations of the same operation type recycle the same block
/// instead of hitting the global allocator each time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecyclingAlloc;

impl BodyAlloc for RecyclingAlloc {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        if let Some(ptr) = POOL.with(|pool| pool.borrow_mut().take(layout)) {
            return Some(ptr);
        }
        SystemAlloc.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let cached = POOL.with(|pool| pool.borrow_mut().put(ptr, layout));
        if !cached {
            SystemAlloc.deallocate(ptr, layout);
        }
    }
}
