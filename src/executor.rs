// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! The executor capability surface consumed by composed operations, plus a
//! minimal single-threaded run loop for driving them deterministically.
//!
//! This crate does not implement I/O or thread management. Everything it
//! needs from the host runtime is captured by the [`Executor`] trait:
//! deferred scheduling (`post`), outstanding-work accounting for keep-alive
//! guards, and a best-effort way to tell whether the current thread is
//! running inside a given executor's context. Any runtime that can provide
//! those three things can host composed operations.
//!
//! [`LocalExecutor`] is the reference implementation: a FIFO queue drained
//! on the calling thread. It is deliberately tiny; production runtimes are
//! expected to implement [`Executor`] on their own run loops.

use scoped_tls::scoped_thread_local;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

/// A deferred unit of work scheduled through [`Executor::post`].
pub type Task = Box<dyn FnOnce() + 'static>;

/// Identity of one executor context, used by the in-context probe.
///
/// Ids are unique per process. An executor that cannot (or does not want to)
/// participate in the probe simply reports no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates a fresh, process-unique context id.
    pub fn new() -> ContextId {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        ContextId::new()
    }
}

scoped_thread_local!(static ACTIVE_CONTEXT: ContextId);

/// The capability surface a host runtime must provide to composed
/// operations.
///
/// The `work_started`/`work_finished` pair implements keep-alive accounting
/// for [`WorkGuard`](crate::WorkGuard)s. The default implementations are
/// no-ops, which is the right choice for "system" executors that perform no
/// real work tracking; a guard over such an executor is a zero-cost
/// pass-through with identical observable behavior.
pub trait Executor {
    /// Schedules `task` for deferred execution. The task must not run on
    /// the caller's stack; it runs on a later iteration of the executor's
    /// run loop.
    fn post(&self, task: Task);

    /// Called when a unit of asynchronous work begins. While the count is
    /// non-zero the executor context must stay alive.
    fn work_started(&self) {}

    /// Called exactly once for each prior `work_started`.
    fn work_finished(&self) {}

    /// Identity of this executor's context, if it participates in the
    /// in-context probe. `None` degrades [`running_in_context`] to
    /// "assume true".
    fn context_id(&self) -> Option<ContextId> {
        None
    }
}

/// A shared, clonable reference to an executor.
pub type ExecutorHandle = Rc<dyn Executor + 'static>;

/// Best-effort probe: is the current thread running inside `ex`'s context?
///
/// Used to validate the direct-upcall precondition. When the executor does
/// not report a [`ContextId`] the probe trusts the caller and returns true.
pub fn running_in_context(ex: &ExecutorHandle) -> bool {
    match ex.context_id() {
        Some(id) => ACTIVE_CONTEXT.is_set() && ACTIVE_CONTEXT.with(|active| *active == id),
        None => true,
    }
}

#[derive(Default)]
struct LocalQueue {
    id: ContextId,
    tasks: RefCell<VecDeque<Task>>,
    outstanding_work: Cell<usize>,
}

impl fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQueue")
            .field("id", &self.id)
            .field("queued_tasks", &self.tasks.borrow().len())
            .field("outstanding_work", &self.outstanding_work.get())
            .finish()
    }
}

impl Executor for LocalQueue {
    fn post(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn work_started(&self) {
        self.outstanding_work.set(self.outstanding_work.get() + 1);
    }

    fn work_finished(&self) {
        let work = self.outstanding_work.get();
        debug_assert!(work > 0, "work_finished without a matching work_started");
        self.outstanding_work.set(work - 1);
    }

    fn context_id(&self) -> Option<ContextId> {
        Some(self.id)
    }
}

/// Single-threaded executor. Tasks posted to it run in FIFO order when the
/// owning thread calls [`run`](LocalExecutor::run) or
/// [`run_one`](LocalExecutor::run_one).
///
/// # Examples
///
/// ```
/// use compose::LocalExecutor;
///
/// let ex = LocalExecutor::new();
/// let handle = ex.handle();
/// handle.post(Box::new(|| println!("deferred")));
/// ex.run();
/// ```
#[derive(Debug)]
pub struct LocalExecutor {
    inner: Rc<LocalQueue>,
}

impl LocalExecutor {
    /// Creates a new executor with an empty task queue.
    pub fn new() -> LocalExecutor {
        LocalExecutor {
            inner: Rc::new(LocalQueue::default()),
        }
    }

    /// Returns a shared handle suitable for initiating composed operations.
    pub fn handle(&self) -> ExecutorHandle {
        self.inner.clone()
    }

    /// Runs a single queued task, if any. Returns whether a task ran.
    pub fn run_one(&self) -> bool {
        let task = self.inner.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                ACTIVE_CONTEXT.set(&self.inner.id, task);
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks until the queue is empty. Tasks posted while
    /// running are executed as part of the same call.
    pub fn run(&self) {
        while self.run_one() {}
    }

    /// Number of keep-alive units currently held against this executor.
    pub fn outstanding_work(&self) -> usize {
        self.inner.outstanding_work.get()
    }

    /// Number of tasks waiting in the queue.
    pub fn queued_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        LocalExecutor::new()
    }
}
