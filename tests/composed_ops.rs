// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! End-to-end scenarios driving composed operations through a
//! [`LocalExecutor`]: immediate completions, suspension loops, early error
//! exits, concurrent operations and body address stability.

use compose::{
    completion_future, handler_fn, inline_transform, stable_transform, with_executor, BodyStorage,
    CompletionHandler, Coroutine, ExecutorHandle, LocalExecutor, OperationBody, UpcallGuard,
    YieldToken,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

type TickResult = Result<(), &'static str>;
type LoopResult = Result<u32, &'static str>;

/// Simulated one-shot timer: completes through the executor's queue,
/// failing when asked to.
fn async_tick(ex: &ExecutorHandle, fail: bool, complete: impl FnOnce(TickResult) + 'static) {
    ex.post(Box::new(move || {
        complete(if fail { Err("tick failed") } else { Ok(()) })
    }));
}

/// Waits for `total` ticks and reports how many completed. The tick issued
/// when `completed` reaches `fail_at` is made to fail, which takes the
/// body's early exit.
struct TickLoop {
    ex: ExecutorHandle,
    total: u32,
    completed: u32,
    fail_at: Option<u32>,
    invocations: Rc<Cell<u32>>,
    coro: Coroutine,
}

impl TickLoop {
    fn new(ex: &ExecutorHandle, total: u32) -> TickLoop {
        TickLoop {
            ex: ex.clone(),
            total,
            completed: 0,
            fail_at: None,
            invocations: Rc::new(Cell::new(0)),
            coro: Coroutine::new(),
        }
    }
}

impl<H> OperationBody<H> for TickLoop
where
    H: CompletionHandler<Result = LoopResult> + 'static,
{
    type Step = TickResult;

    fn resume<S>(mut token: YieldToken<S, H>, step: TickResult) -> UpcallGuard
    where
        S: BodyStorage<Body = Self> + 'static,
    {
        token.invocations.set(token.invocations.get() + 1);
        if let Err(e) = step {
            let _ = token.coro.enter();
            return token.upcall(Err(e));
        }
        match token.coro.enter() {
            0 => {}
            1 => token.completed += 1,
            _ => unreachable!(),
        }
        if token.completed == token.total {
            let completed = token.completed;
            return token.upcall(Ok(completed));
        }
        let fail = token.fail_at == Some(token.completed);
        token.coro.suspend(1);
        let ex = token.ex.clone();
        token.suspend(move |op| async_tick(&ex, fail, op.into_callback()))
    }
}

#[test]
fn zero_tick_loop_completes_through_the_queue() {
    let ex = LocalExecutor::new();
    let results = Rc::new(RefCell::new(Vec::new()));
    let handler = {
        let results = results.clone();
        handler_fn(move |v: LoopResult| results.borrow_mut().push(v))
    };
    let body = TickLoop::new(&ex.handle(), 0);
    let invocations = body.invocations.clone();

    inline_transform(&ex.handle(), handler, body).run(Ok(()));
    assert!(
        results.borrow().is_empty(),
        "immediate completion ran on the initiating stack"
    );

    ex.run();
    assert_eq!(*results.borrow(), vec![Ok(0)]);
    assert_eq!(invocations.get(), 1);
    assert_eq!(ex.outstanding_work(), 0);
}

#[test]
fn five_tick_loop_completes_once_with_the_final_count() {
    let ex = LocalExecutor::new();
    let results = Rc::new(RefCell::new(Vec::new()));
    let handler = {
        let results = results.clone();
        handler_fn(move |v: LoopResult| results.borrow_mut().push(v))
    };
    let body = TickLoop::new(&ex.handle(), 5);
    let invocations = body.invocations.clone();

    inline_transform(&ex.handle(), handler, body).run(Ok(()));
    ex.run();

    assert_eq!(*results.borrow(), vec![Ok(5)]);
    assert_eq!(invocations.get(), 6, "one initial invocation plus one per tick");
    assert_eq!(ex.outstanding_work(), 0);
    assert_eq!(ex.queued_tasks(), 0);
}

#[test]
fn a_failed_tick_stops_the_loop_early() {
    let ex = LocalExecutor::new();
    let results = Rc::new(RefCell::new(Vec::new()));
    let handler = {
        let results = results.clone();
        handler_fn(move |v: LoopResult| results.borrow_mut().push(v))
    };
    let mut body = TickLoop::new(&ex.handle(), 5);
    body.fail_at = Some(2);
    let invocations = body.invocations.clone();

    inline_transform(&ex.handle(), handler, body).run(Ok(()));
    ex.run();

    assert_eq!(*results.borrow(), vec![Err("tick failed")]);
    // Two successful ticks plus the failed one; no resumption after that.
    assert_eq!(invocations.get(), 4);
    assert_eq!(ex.outstanding_work(), 0);
    assert_eq!(ex.queued_tasks(), 0);
}

#[test]
fn concurrent_operations_do_not_interfere() {
    let ex = LocalExecutor::new();
    let results = Rc::new(RefCell::new(Vec::new()));
    let short = {
        let results = results.clone();
        handler_fn(move |v: LoopResult| results.borrow_mut().push(("short", v)))
    };
    let long = {
        let results = results.clone();
        handler_fn(move |v: LoopResult| results.borrow_mut().push(("long", v)))
    };

    inline_transform(&ex.handle(), short, TickLoop::new(&ex.handle(), 3)).run(Ok(()));
    inline_transform(&ex.handle(), long, TickLoop::new(&ex.handle(), 5)).run(Ok(()));
    assert_eq!(ex.outstanding_work(), 2);

    ex.run();
    assert_eq!(*results.borrow(), vec![("short", Ok(3)), ("long", Ok(5))]);
    assert_eq!(ex.outstanding_work(), 0);
}

/// Records the address its own state is observed at on every invocation.
struct AddressProbe {
    ex: ExecutorHandle,
    remaining: u32,
    seen: Rc<RefCell<Vec<usize>>>,
    coro: Coroutine,
}

impl<H> OperationBody<H> for AddressProbe
where
    H: CompletionHandler<Result = ()> + 'static,
{
    type Step = ();

    fn resume<S>(mut token: YieldToken<S, H>, _step: ()) -> UpcallGuard
    where
        S: BodyStorage<Body = Self> + 'static,
    {
        let addr = &*token as *const Self as usize;
        token.seen.borrow_mut().push(addr);
        match token.coro.enter() {
            0 | 1 => {}
            _ => unreachable!(),
        }
        if token.remaining == 0 {
            return token.upcall(());
        }
        token.remaining -= 1;
        token.coro.suspend(1);
        let ex = token.ex.clone();
        token.suspend(move |op| ex.post(Box::new(move || op.continue_with(()))))
    }
}

#[test]
fn stable_bodies_keep_one_address_across_all_suspensions() {
    let ex = LocalExecutor::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let body = AddressProbe {
        ex: ex.handle(),
        remaining: 3,
        seen: seen.clone(),
        coro: Coroutine::new(),
    };

    let pending = stable_transform(&ex.handle(), handler_fn(|_: ()| {}), body).unwrap();
    let fixed = pending.stable_ptr().as_ptr() as usize;
    pending.run(());
    ex.run();

    assert_eq!(seen.borrow().len(), 4);
    assert!(seen.borrow().iter().all(|&addr| addr == fixed));
}

#[test]
fn completion_is_posted_to_the_handlers_preferred_executor() {
    let io_ex = LocalExecutor::new();
    let handler_ex = LocalExecutor::new();
    let done = Rc::new(Cell::new(false));
    let handler = {
        let done = done.clone();
        with_executor(
            handler_fn(move |v: LoopResult| {
                assert_eq!(v, Ok(0));
                done.set(true);
            }),
            handler_ex.handle(),
        )
    };

    let body = TickLoop::new(&io_ex.handle(), 0);
    inline_transform(&io_ex.handle(), handler, body).run(Ok(()));

    // Both the keep-alive and the terminal upcall bind to the handler's
    // executor, not the one the operation was initiated on.
    assert_eq!(handler_ex.outstanding_work(), 1);
    assert_eq!(io_ex.outstanding_work(), 0);
    assert_eq!(handler_ex.queued_tasks(), 1);

    io_ex.run();
    assert!(!done.get());
    handler_ex.run();
    assert!(done.get());
    assert_eq!(handler_ex.outstanding_work(), 0);
}

#[test]
fn a_dropped_operation_releases_work_without_completing() {
    /// Hands itself to a sub-operation that drops the callback unused.
    struct Abandon {
        coro: Coroutine,
    }

    impl<H> OperationBody<H> for Abandon
    where
        H: CompletionHandler<Result = ()> + 'static,
    {
        type Step = ();

        fn resume<S>(mut token: YieldToken<S, H>, _step: ()) -> UpcallGuard
        where
            S: BodyStorage<Body = Self> + 'static,
        {
            let _ = token.coro.enter();
            token.coro.suspend(1);
            token.suspend(drop)
        }
    }

    let ex = LocalExecutor::new();
    let called = Rc::new(Cell::new(false));
    let handler = {
        let called = called.clone();
        handler_fn(move |_: ()| called.set(true))
    };

    inline_transform(&ex.handle(), handler, Abandon { coro: Coroutine::new() }).run(());
    ex.run();

    assert!(!called.get());
    assert_eq!(ex.outstanding_work(), 0);
}

#[test]
fn a_composed_operation_can_be_awaited() {
    let ex = LocalExecutor::new();
    let (handler, result) = completion_future::<LoopResult>();
    let body = TickLoop::new(&ex.handle(), 2);

    inline_transform(&ex.handle(), handler, body).run(Ok(()));
    ex.run();

    assert_eq!(futures_lite::future::block_on(result), Ok(2));
}
