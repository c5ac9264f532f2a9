// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Cooperative cancellation for long-running network operations.
//!
//! A [`CancellableTask`] pairs a future with a [`CancelHandle`]. Cancelling
//! never interrupts the underlying operation: it makes the waiter stop
//! waiting and observe a [`Cancelled`] error instead of the late result.
//! Handles can be linked together, so cancelling a task built out of other
//! tasks (through [`CancellableTask::chain`] or the combinators in this
//! module) cancels every task it is still waiting on.
use futures_util::future::{self, BoxFuture, FutureExt as _};
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// The distinguished error a task settles with once it has been cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

impl std::error::Error for Cancelled {}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task was cancelled")
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    settled: bool,
    on_cancel: Option<CancelFn>,
    children: Vec<CancelHandle>,
    waker: Option<Waker>,
}

/// The cancel side of a [`CancellableTask`].
///
/// Cloning the handle is cheap, and every clone cancels the same task.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<Mutex<CancelState>>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_cancel_fn(cancel_fn: CancelFn) -> Self {
        let handle = Self::new();
        handle.0.lock().unwrap().on_cancel = Some(cancel_fn);
        handle
    }

    /// Cancel the task, along with every task linked to it.
    ///
    /// Only the first call has any effect, and none at all once the task
    /// has settled.
    pub fn cancel(&self) {
        let (on_cancel, children, waker) = {
            let mut state = self.0.lock().unwrap();
            if state.cancelled || state.settled {
                return;
            }
            state.cancelled = true;
            (
                state.on_cancel.take(),
                mem::take(&mut state.children),
                state.waker.take(),
            )
        };

        if let Some(on_cancel) = on_cancel {
            on_cancel();
        }
        children.iter().for_each(CancelHandle::cancel);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.lock().unwrap().cancelled
    }

    pub fn is_settled(&self) -> bool {
        self.0.lock().unwrap().settled
    }

    /// Make `child` get cancelled whenever this handle is.
    ///
    /// If this handle was already cancelled, `child` is cancelled right away.
    pub fn link(&self, child: CancelHandle) {
        let mut state = self.0.lock().unwrap();
        if state.cancelled {
            drop(state);
            child.cancel();
            return;
        }
        if state.settled {
            return;
        }
        state.children.retain(|c| !c.is_settled());
        state.children.push(child);
    }

    /// Returns `true` if the task was cancelled, registering the waker otherwise.
    fn register(&self, waker: &Waker) -> bool {
        let mut state = self.0.lock().unwrap();
        if state.cancelled {
            return true;
        }
        match state.waker {
            Some(ref w) if w.will_wake(waker) => {}
            _ => state.waker = Some(waker.clone()),
        }
        false
    }

    fn settle(&self) {
        let mut state = self.0.lock().unwrap();
        state.settled = true;
        state.on_cancel = None;
        state.children.clear();
        state.waker = None;
    }
}

/// An eventual `Result<T, E>` that can be cancelled before it settles.
///
/// The error type must be able to represent [`Cancelled`], which is what the
/// task resolves to when cancelled.
pub struct CancellableTask<T, E> {
    future: Option<BoxFuture<'static, Result<T, E>>>,
    handle: CancelHandle,
}

impl<T, E> CancellableTask<T, E>
where
    T: Send + 'static,
    E: From<Cancelled> + Send + 'static,
{
    /// Build a task from a future and the callback that aborts it.
    ///
    /// `cancel_fn` runs at most once, and never after the future settled.
    pub fn wrap<F, C>(future: F, cancel_fn: C) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self {
            future: Some(future.boxed()),
            handle: CancelHandle::with_cancel_fn(Box::new(cancel_fn)),
        }
    }

    /// Adapt a future with no way to abort it.
    ///
    /// Cancelling the task only stops the waiter from receiving the result.
    pub fn pseudo_wrap<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            future: Some(future.boxed()),
            handle: CancelHandle::new(),
        }
    }

    /// A task that is already settled.
    pub fn ready(result: Result<T, E>) -> Self {
        Self::pseudo_wrap(future::ready(result))
    }

    /// Continue with the task returned by `on_success` or `on_failure`.
    ///
    /// Cancelling the returned task cancels `self` and, once it exists, the
    /// task the callbacks produced. Chains of any length cancel as a unit.
    pub fn chain<U, S, F>(self, on_success: S, on_failure: F) -> CancellableTask<U, E>
    where
        U: Send + 'static,
        S: FnOnce(T) -> CancellableTask<U, E> + Send + 'static,
        F: FnOnce(E) -> CancellableTask<U, E> + Send + 'static,
    {
        let handle = CancelHandle::new();
        handle.link(self.cancel_handle());

        let outer = handle.clone();
        let future = async move {
            let next = match self.await {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            };
            outer.link(next.cancel_handle());
            next.await
        };

        CancellableTask {
            future: Some(future.boxed()),
            handle,
        }
    }

    /// Shorthand for [`CancellableTask::chain`] propagating errors unchanged.
    pub fn and_then<U, S>(self, on_success: S) -> CancellableTask<U, E>
    where
        U: Send + 'static,
        S: FnOnce(T) -> CancellableTask<U, E> + Send + 'static,
    {
        self.chain(on_success, |error| CancellableTask::ready(Err(error)))
    }
}

impl<T, E> CancellableTask<T, E> {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Cancel this task. See [`CancelHandle::cancel`].
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl<T, E: From<Cancelled>> Future for CancellableTask<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.handle.register(cx.waker()) {
            // Drop the inner future now so that timers and buffers are released.
            this.future = None;
            return Poll::Ready(Err(Cancelled.into()));
        }

        let Some(future) = this.future.as_mut() else {
            panic!("`CancellableTask` polled after completion");
        };
        match future.as_mut().poll(cx) {
            Poll::Ready(result) => {
                this.future = None;
                this.handle.settle();
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn link_all<T, E>(handle: &CancelHandle, tasks: &[CancellableTask<T, E>]) -> Vec<CancelHandle> {
    tasks
        .iter()
        .map(|task| {
            handle.link(task.cancel_handle());
            task.cancel_handle()
        })
        .collect()
}

/// Wait for every task to succeed, failing as soon as one of them fails.
///
/// When one task fails, the remaining ones are cancelled.
pub fn all<T, E, I>(tasks: I) -> CancellableTask<Vec<T>, E>
where
    T: Send + 'static,
    E: From<Cancelled> + Send + 'static,
    I: IntoIterator<Item = CancellableTask<T, E>>,
{
    let tasks = tasks.into_iter().collect::<Vec<_>>();
    let handle = CancelHandle::new();
    let handles = link_all(&handle, &tasks);

    let future = async move {
        let result = future::try_join_all(tasks).await;
        if result.is_err() {
            handles.iter().for_each(CancelHandle::cancel);
        }
        result
    };

    CancellableTask {
        future: Some(future.boxed()),
        handle,
    }
}

/// Settle with the first task to settle, cancelling all others.
///
/// Racing no tasks at all produces a task that only settles when cancelled.
pub fn race<T, E, I>(tasks: I) -> CancellableTask<T, E>
where
    T: Send + 'static,
    E: From<Cancelled> + Send + 'static,
    I: IntoIterator<Item = CancellableTask<T, E>>,
{
    let tasks = tasks.into_iter().collect::<Vec<_>>();
    let handle = CancelHandle::new();
    link_all(&handle, &tasks);

    let future = async move {
        if tasks.is_empty() {
            return future::pending().await;
        }
        let (result, _, rest) = future::select_all(tasks).await;
        rest.iter().for_each(CancellableTask::cancel);
        result
    };

    CancellableTask {
        future: Some(future.boxed()),
        handle,
    }
}

/// Wait for every task to settle, collecting each individual result.
pub fn settle_all<T, E, I>(tasks: I) -> CancellableTask<Vec<Result<T, E>>, E>
where
    T: Send + 'static,
    E: From<Cancelled> + Send + 'static,
    I: IntoIterator<Item = CancellableTask<T, E>>,
{
    let tasks = tasks.into_iter().collect::<Vec<_>>();
    let handle = CancelHandle::new();
    link_all(&handle, &tasks);

    CancellableTask {
        future: Some(future::join_all(tasks).map(Ok).boxed()),
        handle,
    }
}

/// A task that succeeds once `duration` has elapsed.
///
/// Cancelling it settles it immediately and releases the timer.
pub fn delay<E>(duration: Duration) -> CancellableTask<(), E>
where
    E: From<Cancelled> + Send + 'static,
{
    CancellableTask::pseudo_wrap(async move {
        tokio::time::sleep(duration).await;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[derive(Debug, PartialEq)]
    enum Error {
        Cancelled,
        Failed(u32),
    }

    impl From<Cancelled> for Error {
        fn from(_: Cancelled) -> Self {
            Self::Cancelled
        }
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    /// A task that never settles, counting how many times it gets cancelled.
    fn stuck(cancels: &Arc<AtomicUsize>) -> CancellableTask<u32, Error> {
        let cancels = Arc::clone(cancels);
        CancellableTask::wrap(future::pending(), move || {
            cancels.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn after(
        millis: u64,
        value: Result<u32, Error>,
        cancels: &Arc<AtomicUsize>,
    ) -> CancellableTask<u32, Error> {
        let cancels = Arc::clone(cancels);
        CancellableTask::wrap(
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                value
            },
            move || {
                cancels.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[tokio::test]
    async fn wrapped_value_is_delivered() {
        let cancels = counter();
        let task = after(0, Ok(7), &cancels);
        assert_eq!(task.await, Ok(7));
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let cancels = counter();
        let task = stuck(&cancels);
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.await, Err(Error::Cancelled));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_after_settlement_is_noop() {
        let cancels = counter();
        let mut task = after(0, Ok(1), &cancels);
        let handle = task.cancel_handle();
        assert_eq!((&mut task).await, Ok(1));
        handle.cancel();
        assert!(!handle.is_cancelled());
        assert!(handle.is_settled());
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pseudo_wrap_discards_late_result() {
        let (tx, rx) = oneshot::channel::<u32>();
        let task = CancellableTask::<u32, Error>::pseudo_wrap(async move {
            rx.await.map_err(|_| Error::Failed(0))
        });
        task.cancel();
        // The sender is unaffected, the value is simply never delivered.
        let _ = tx.send(5);
        assert_eq!(task.await, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn chain_propagates_cancellation_to_inner_task() {
        let cancels = counter();
        let inner_cancels = Arc::clone(&cancels);
        let mut task = CancellableTask::<u32, Error>::ready(Ok(1)).and_then(move |one| {
            CancellableTask::ready(Ok(one + 1)).and_then(move |_| stuck(&inner_cancels))
        });

        // Drive the chain until it is parked on the innermost task.
        assert!(future::poll_immediate(&mut task).await.is_none());
        task.cancel();
        task.cancel();

        assert_eq!(task.await, Err(Error::Cancelled));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chain_cancels_original_task() {
        let cancels = counter();
        let task = stuck(&cancels).chain(
            |value| CancellableTask::ready(Ok(value)),
            |error| CancellableTask::ready(Err(error)),
        );
        task.cancel();
        assert_eq!(task.await, Err(Error::Cancelled));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chain_routes_failures() {
        let task = CancellableTask::<u32, Error>::ready(Err(Error::Failed(3))).chain(
            |_| CancellableTask::ready(Ok(0)),
            |error| match error {
                Error::Failed(n) => CancellableTask::ready(Ok(n * 10)),
                other => CancellableTask::ready(Err(other)),
            },
        );
        assert_eq!(task.await, Ok(30));
    }

    #[tokio::test(start_paused = true)]
    async fn all_keeps_order() {
        let cancels = counter();
        let task = all([
            after(30, Ok(1), &cancels),
            after(10, Ok(2), &cancels),
            after(20, Ok(3), &cancels),
        ]);
        assert_eq!(task.await, Ok(vec![1, 2, 3]));
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn all_cancels_the_rest_on_failure() {
        let cancels = counter();
        let task = all([
            stuck(&cancels),
            after(10, Err(Error::Failed(1)), &cancels),
            stuck(&cancels),
        ]);
        assert_eq!(task.await, Err(Error::Failed(1)));
        assert_eq!(cancels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelling_combination_cancels_every_task() {
        let cancels = counter();
        let task = all([stuck(&cancels), stuck(&cancels), stuck(&cancels)]);
        task.cancel();
        assert_eq!(task.await, Err(Error::Cancelled));
        assert_eq!(cancels.load(Ordering::SeqCst), 3);

        let cancels = counter();
        let task = settle_all([stuck(&cancels), stuck(&cancels)]);
        task.cancel();
        assert_eq!(task.await, Err(Error::Cancelled));
        assert_eq!(cancels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn race_settles_with_first_and_cancels_losers() {
        let cancels = counter();
        let task = race([
            after(50, Ok(1), &cancels),
            after(10, Ok(2), &cancels),
            stuck(&cancels),
        ]);
        assert_eq!(task.await, Ok(2));
        assert_eq!(cancels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_all_collects_everything() {
        let cancels = counter();
        let task = settle_all([
            after(20, Ok(1), &cancels),
            after(10, Err(Error::Failed(2)), &cancels),
        ]);
        assert_eq!(task.await, Ok(vec![Ok(1), Err(Error::Failed(2))]));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_elapses() {
        let start = tokio::time::Instant::now();
        delay::<Cancelled>(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_can_be_raced_as_timeout() {
        let cancels = counter();
        let timeout = delay::<Error>(Duration::from_secs(1))
            .and_then(|_| CancellableTask::ready(Err(Error::Failed(408))));
        let start = tokio::time::Instant::now();
        let task = race([stuck(&cancels), timeout]);
        assert_eq!(task.await, Err(Error::Failed(408)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delay_settles_immediately() {
        let task = delay::<Cancelled>(Duration::from_secs(3600));
        let handle = task.cancel_handle();
        let start = tokio::time::Instant::now();
        tokio::spawn(async move { handle.cancel() });
        assert_eq!(task.await, Err(Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
