//! # promise 模块说明
//!
//! ## 角色定位（Why）
//! - 完成信号（供应方的 end-of-stream、消费方的 acknowledgement、Sink 的结果）都是“一次完成、多次观察”的异步结果；
//! - 引擎运行在单线程调度器上，回调需要在完成时同步触发，才能让 `close_with_error` 在返回前传播到对端。
//!
//! ## 契约（What）
//! - [`SettablePromise`] 只接受第一次完成，后续 `set` 返回 `false`；
//! - [`Promise::when_complete`] 在完成前登记、完成时按登记顺序执行；完成后登记则立即执行；
//! - 回调执行时不持有任何内部借用，回调内部可以再次读取或登记同一个 Promise；
//! - `T: Clone` 时 [`Promise`] 实现 [`Future`]，可交给任意执行器等待。
//!
//! ## 注意事项（Trade-offs）
//! - 结果以 `Rc<Result<T, StreamError>>` 保存，观察者拿到的是借用；需要所有权时由调用方自行克隆；
//! - 组合子（`map`/`then`/`both`/`timeout`）都以回调串联实现，不经过调度器，链条本身不引入额外 tick。

use std::{
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    mem,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
    time::Duration,
};

use tracing::debug;

use crate::{error::StreamError, scheduler::Scheduler};

type Outcome<T> = Rc<Result<T, StreamError>>;
type Callback<T> = Box<dyn FnOnce(&Result<T, StreamError>)>;

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Complete(Outcome<T>),
}

/// 一次完成、多次观察的异步结果。
pub struct Promise<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> Promise<T> {
    fn pending() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Pending {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// 已成功完成的 Promise。
    pub fn ready(value: T) -> Self {
        Self::completed(Ok(value))
    }

    /// 已失败完成的 Promise。
    pub fn failed(error: impl Into<StreamError>) -> Self {
        Self::completed(Err(error.into()))
    }

    pub fn completed(result: Result<T, StreamError>) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::Complete(Rc::new(result)))),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(&*self.state.borrow(), State::Complete(_))
    }

    /// 已完成且为成功。
    pub fn is_result(&self) -> bool {
        matches!(&*self.state.borrow(), State::Complete(outcome) if outcome.is_ok())
    }

    /// 已完成且为失败。
    pub fn is_exception(&self) -> bool {
        matches!(&*self.state.borrow(), State::Complete(outcome) if outcome.is_err())
    }

    /// 失败时返回错误的克隆。
    pub fn error(&self) -> Option<StreamError> {
        match &*self.state.borrow() {
            State::Complete(outcome) => (**outcome).as_ref().err().cloned(),
            State::Pending { .. } => None,
        }
    }

    /// 登记完成回调。
    pub fn when_complete(&self, callback: impl FnOnce(&Result<T, StreamError>) + 'static) -> &Self {
        let outcome = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return self;
                }
                State::Complete(outcome) => Rc::clone(outcome),
            }
        };
        callback(&outcome);
        self
    }

    /// 仅在成功时执行回调。
    pub fn when_result(&self, callback: impl FnOnce(&T) + 'static) -> &Self {
        self.when_complete(move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        })
    }

    /// 仅在失败时执行回调。
    pub fn when_exception(&self, callback: impl FnOnce(&StreamError) + 'static) -> &Self {
        self.when_complete(move |result| {
            if let Err(error) = result {
                callback(error);
            }
        })
    }

    /// 成功值映射，失败原样透传。
    pub fn map<U: 'static>(&self, f: impl FnOnce(&T) -> U + 'static) -> Promise<U> {
        let mapped = SettablePromise::new();
        let target = mapped.clone();
        self.when_complete(move |result| {
            target.set(match result {
                Ok(value) => Ok(f(value)),
                Err(error) => Err(error.clone()),
            });
        });
        mapped.promise()
    }

    /// 错误映射，成功值原样透传。
    pub fn map_err(&self, f: impl FnOnce(&StreamError) -> StreamError + 'static) -> Promise<T>
    where
        T: Clone,
    {
        let mapped = SettablePromise::new();
        let target = mapped.clone();
        self.when_complete(move |result| {
            target.set(match result {
                Ok(value) => Ok(value.clone()),
                Err(error) => Err(f(error)),
            });
        });
        mapped.promise()
    }

    /// 成功后串联下一个异步步骤。
    pub fn then<U: 'static>(&self, f: impl FnOnce(&T) -> Promise<U> + 'static) -> Promise<U>
    where
        U: Clone,
    {
        let chained = SettablePromise::new();
        let target = chained.clone();
        self.when_complete(move |result| match result {
            Ok(value) => {
                let next = f(value);
                next.when_complete(move |inner| {
                    target.set(inner.clone());
                });
            }
            Err(error) => {
                target.set(Err(error.clone()));
            }
        });
        chained.promise()
    }

    /// 合取：两者都成功才成功，任一失败则以最先到达的错误失败。
    pub fn both<U: 'static>(&self, other: &Promise<U>) -> Promise<()> {
        let combined = SettablePromise::new();
        let remaining = Rc::new(Cell::new(2_u8));
        let left = arrival(&combined, &remaining);
        self.when_complete(move |result| left(result.as_ref().map(|_| ())));
        let right = arrival(&combined, &remaining);
        other.when_complete(move |result| right(result.as_ref().map(|_| ())));
        combined.promise()
    }

    /// 丢弃成功值。
    pub fn to_void(&self) -> Promise<()> {
        self.map(|_| ())
    }

    /// 在逻辑时钟推进 `after` 之前未完成则以 [`StreamError::Timeout`] 失败。
    ///
    /// 原 Promise 先完成时取消计时器，调度器不会因此推进时钟。
    pub fn timeout(&self, scheduler: &Scheduler, after: Duration) -> Promise<T>
    where
        T: Clone,
    {
        if self.is_complete() {
            return self.clone();
        }
        let timed = SettablePromise::new();
        let expiry = timed.clone();
        let timer = scheduler.schedule(after, move || {
            if expiry.set(Err(StreamError::Timeout(after))) {
                debug!(?after, "completion timed out");
            }
        });
        let target = timed.clone();
        self.when_complete(move |result| {
            timer.cancel();
            target.set(result.clone());
        });
        timed.promise()
    }

    /// 已完成时返回结果克隆。
    pub fn result(&self) -> Option<Result<T, StreamError>>
    where
        T: Clone,
    {
        match &*self.state.borrow() {
            State::Complete(outcome) => Some((**outcome).clone()),
            State::Pending { .. } => None,
        }
    }

    fn complete(&self, result: Result<T, StreamError>) -> bool {
        let (callbacks, wakers, outcome) = {
            let mut state = self.state.borrow_mut();
            if matches!(&*state, State::Complete(_)) {
                return false;
            }
            let outcome = Rc::new(result);
            let previous = mem::replace(&mut *state, State::Complete(Rc::clone(&outcome)));
            let State::Pending { callbacks, wakers } = previous else {
                return false;
            };
            (callbacks, wakers, outcome)
        };
        wakers.into_iter().for_each(Waker::wake);
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }
}

impl Promise<()> {
    /// 全部成功才成功；空集合立即成功。
    pub fn all(promises: impl IntoIterator<Item = Promise<()>>) -> Promise<()> {
        let promises: Vec<_> = promises.into_iter().collect();
        if promises.is_empty() {
            return Promise::ready(());
        }
        let combined = SettablePromise::new();
        let counter = Rc::new(Cell::new(promises.len()));
        for promise in promises {
            let combined = combined.clone();
            let counter = Rc::clone(&counter);
            promise.when_complete(move |result| match result {
                Ok(()) => {
                    counter.set(counter.get() - 1);
                    if counter.get() == 0 {
                        combined.set(Ok(()));
                    }
                }
                Err(error) => {
                    combined.set(Err(error.clone()));
                }
            });
        }
        combined.promise()
    }
}

fn arrival(
    combined: &SettablePromise<()>,
    remaining: &Rc<Cell<u8>>,
) -> impl FnOnce(Result<(), &StreamError>) + 'static {
    let combined = combined.clone();
    let remaining = Rc::clone(remaining);
    move |result| match result {
        Ok(()) => {
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                combined.set(Ok(()));
            }
        }
        Err(error) => {
            combined.set(Err(error.clone()));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.state.borrow() {
            State::Pending { callbacks, .. } => format!("pending({} callbacks)", callbacks.len()),
            State::Complete(outcome) if outcome.is_ok() => "ok".to_owned(),
            State::Complete(_) => "failed".to_owned(),
        };
        f.debug_struct("Promise").field("status", &status).finish()
    }
}

impl<T: Clone + 'static> Future for Promise<T> {
    type Output = Result<T, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            State::Complete(outcome) => Poll::Ready((**outcome).clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// 可写入一次的 Promise 生产端。
pub struct SettablePromise<T> {
    promise: Promise<T>,
}

impl<T> Clone for SettablePromise<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: 'static> Default for SettablePromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SettablePromise<T> {
    pub fn new() -> Self {
        Self {
            promise: Promise::pending(),
        }
    }

    /// 读取端。
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    /// 写入结果；已完成时返回 `false` 且不产生任何效果。
    pub fn set(&self, result: Result<T, StreamError>) -> bool {
        self.promise.complete(result)
    }

    pub fn set_value(&self, value: T) -> bool {
        self.set(Ok(value))
    }

    pub fn set_error(&self, error: impl Into<StreamError>) -> bool {
        self.set(Err(error.into()))
    }

    pub fn is_complete(&self) -> bool {
        self.promise.is_complete()
    }
}

impl<T> fmt::Debug for SettablePromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SettablePromise")
            .field(&self.promise)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom() -> StreamError {
        StreamError::failed("test.boom", "boom")
    }

    #[test]
    fn completes_once_and_replays_to_late_observers() {
        let settable = SettablePromise::new();
        let promise = settable.promise();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            promise.when_result(move |value: &u32| seen.borrow_mut().push(("early", *value)));
        }
        assert!(settable.set_value(7));
        assert!(!settable.set_value(8));
        assert!(!settable.set_error(boom()));
        {
            let seen = Rc::clone(&seen);
            promise.when_result(move |value| seen.borrow_mut().push(("late", *value)));
        }
        assert_eq!(*seen.borrow(), vec![("early", 7), ("late", 7)]);
        assert_eq!(promise.result(), Some(Ok(7)));
    }

    #[test]
    fn callbacks_may_reenter_the_same_promise() {
        let settable = SettablePromise::<u32>::new();
        let promise = settable.promise();
        let observed = Rc::new(Cell::new(None));
        {
            let again = promise.clone();
            let observed = Rc::clone(&observed);
            let retry = settable.clone();
            promise.when_complete(move |_| {
                assert!(!retry.set_value(99));
                observed.set(again.result().and_then(Result::ok));
            });
        }
        settable.set_value(1);
        assert_eq!(observed.get(), Some(1));
    }

    #[test]
    fn both_fails_with_first_error() {
        let left = SettablePromise::<()>::new();
        let right = SettablePromise::<u8>::new();
        let combined = left.promise().both(&right.promise());

        right.set_error(boom());
        assert_eq!(combined.result(), Some(Err(boom())));
        left.set_error(StreamError::Stalled);
        assert_eq!(combined.error(), Some(boom()));
    }

    #[test]
    fn both_succeeds_only_after_both_sides() {
        let left = SettablePromise::<()>::new();
        let right = SettablePromise::<()>::new();
        let combined = left.promise().both(&right.promise());
        left.set_value(());
        assert!(!combined.is_complete());
        right.set_value(());
        assert!(combined.is_result());
    }

    #[test]
    fn all_handles_empty_and_mixed_inputs() {
        assert!(Promise::all(Vec::new()).is_result());
        let pending = SettablePromise::new();
        let combined = Promise::all([Promise::ready(()), pending.promise()]);
        assert!(!combined.is_complete());
        pending.set_value(());
        assert!(combined.is_result());
    }

    #[test]
    fn map_then_and_map_err_chain() {
        let source = SettablePromise::new();
        let chained = source
            .promise()
            .map(|value: &u32| value * 2)
            .then(|doubled| Promise::ready(doubled + 1));
        source.set_value(20);
        assert_eq!(chained.result(), Some(Ok(41)));

        let failing = Promise::<u32>::failed(boom()).map_err(|_| StreamError::Stalled);
        assert_eq!(failing.result(), Some(Err(StreamError::Stalled)));
    }

    #[test]
    fn timeout_fires_on_logical_clock() {
        let scheduler = Scheduler::new();
        let never = SettablePromise::<()>::new();
        let timed = never.promise().timeout(&scheduler, Duration::from_secs(5));
        scheduler.run().expect("运行调度器");
        assert_eq!(
            timed.result(),
            Some(Err(StreamError::Timeout(Duration::from_secs(5))))
        );
        assert_eq!(scheduler.now(), Duration::from_secs(5));
    }

    #[test]
    fn timeout_is_cancelled_by_completion() {
        let scheduler = Scheduler::new();
        let source = SettablePromise::new();
        let timed = source.promise().timeout(&scheduler, Duration::from_secs(5));
        let setter = source.clone();
        scheduler.post(move || {
            setter.set_value(3_u8);
        });
        scheduler.run().expect("运行调度器");
        assert_eq!(timed.result(), Some(Ok(3)));
        assert_eq!(scheduler.now(), Duration::ZERO);
    }

    #[test]
    fn promise_is_a_future() {
        use futures::{executor::LocalPool, task::LocalSpawnExt};

        let settable = SettablePromise::new();
        let promise = settable.promise();
        let received = Rc::new(Cell::new(None));
        let mut pool = LocalPool::new();
        {
            let received = Rc::clone(&received);
            pool.spawner()
                .spawn_local(async move {
                    received.set(promise.await.ok());
                })
                .expect("提交本地任务");
        }
        pool.run_until_stalled();
        assert_eq!(received.get(), None);
        settable.set_value(11_u64);
        pool.run_until_stalled();
        assert_eq!(received.get(), Some(11));
    }
}
