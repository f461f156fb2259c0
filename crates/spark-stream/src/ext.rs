//! 面向调用方的链式 API。
//!
//! 扩展 trait 直接实现在 [`SupplierRef`] / [`ConsumerRef`] 上，组合子之间可以自由串接：
//!
//! ```
//! use spark_stream::prelude::*;
//!
//! let scheduler = Scheduler::new();
//! let doubled = supplier::of_iter(&scheduler, 1..=3_u32)
//!     .map(|value| value * 2)
//!     .to_list()
//!     .expect("绑定");
//! assert_eq!(scheduler.block_on(&doubled), Ok(vec![2, 4, 6]));
//! ```

use std::{rc::Rc, time::Duration};

use crate::{
    capability::Capability,
    consumer,
    contract::{
        ConsumerRef, StreamCompletion, StreamConsumerWithResult, StreamResult, SupplierRef, bind,
        bind_with_result,
    },
    decorator,
    error::StreamError,
    forwarder::Forwarder,
    promise::Promise,
};

/// 供应方扩展。
pub trait SupplierExt<T: 'static> {
    /// 绑定到 `consumer`。
    fn stream_to(&self, consumer: &ConsumerRef<T>) -> Result<StreamCompletion, StreamError>;

    /// 绑定到带结果的消费方。
    fn stream_to_result<R, C>(&self, consumer: Rc<C>) -> Result<StreamResult<R>, StreamError>
    where
        R: 'static,
        C: StreamConsumerWithResult<T, R>;

    /// 收集为列表。
    fn to_list(&self) -> Result<Promise<Vec<T>>, StreamError>;

    /// 以自定义折叠收集。
    fn to_collector<A: 'static, R: 'static>(
        &self,
        init: A,
        fold: impl FnMut(&mut A, T) + 'static,
        finish: impl FnOnce(A) -> R + 'static,
    ) -> Result<Promise<R>, StreamError>;

    /// 返回可在任意 tick 绑定的等价供应方。
    ///
    /// 已声明 `LATE_BINDING` 时原样返回，否则立即绑定到一个恒等转发器并返回其输出。
    fn with_late_binding(&self) -> Result<SupplierRef<T>, StreamError>;

    fn map<U: 'static>(&self, f: impl FnMut(T) -> U + 'static) -> SupplierRef<U>;

    fn filter(&self, predicate: impl FnMut(&T) -> bool + 'static) -> SupplierRef<T>;

    fn with_timeout(&self, after: Duration) -> SupplierRef<T>;

    fn map_error(&self, map: impl FnOnce(&StreamError) -> StreamError + 'static) -> SupplierRef<T>;

    /// 观察 end-of-stream 的成功完成。
    fn when_end_of_stream(&self, callback: impl FnOnce() + 'static) -> SupplierRef<T>;

    /// 观察 end-of-stream 的失败。
    fn when_exception(&self, callback: impl FnOnce(&StreamError) + 'static) -> SupplierRef<T>;
}

impl<T: 'static> SupplierExt<T> for SupplierRef<T> {
    fn stream_to(&self, consumer: &ConsumerRef<T>) -> Result<StreamCompletion, StreamError> {
        bind(self, consumer)
    }

    fn stream_to_result<R, C>(&self, consumer: Rc<C>) -> Result<StreamResult<R>, StreamError>
    where
        R: 'static,
        C: StreamConsumerWithResult<T, R>,
    {
        bind_with_result(self, consumer)
    }

    fn to_list(&self) -> Result<Promise<Vec<T>>, StreamError> {
        let sink = consumer::to_list(&self.scheduler());
        Ok(self.stream_to_result(sink)?.into_result())
    }

    fn to_collector<A: 'static, R: 'static>(
        &self,
        init: A,
        fold: impl FnMut(&mut A, T) + 'static,
        finish: impl FnOnce(A) -> R + 'static,
    ) -> Result<Promise<R>, StreamError> {
        let sink = consumer::to_collector(&self.scheduler(), init, fold, finish);
        Ok(self.stream_to_result(sink)?.into_result())
    }

    fn with_late_binding(&self) -> Result<SupplierRef<T>, StreamError> {
        if self.capabilities().contains(Capability::LateBinding) {
            return Ok(Rc::clone(self));
        }
        let forwarder = Forwarder::identity(&self.scheduler(), "supplier.late_binding");
        bind(self, &forwarder.input())?;
        Ok(forwarder.output())
    }

    fn map<U: 'static>(&self, mut f: impl FnMut(T) -> U + 'static) -> SupplierRef<U> {
        let forwarder = Forwarder::new(&self.scheduler(), "supplier.map", move |item: T| {
            Some(f(item))
        });
        attach(self, &forwarder.input());
        forwarder.output()
    }

    fn filter(&self, mut predicate: impl FnMut(&T) -> bool + 'static) -> SupplierRef<T> {
        let forwarder = Forwarder::new(&self.scheduler(), "supplier.filter", move |item: T| {
            predicate(&item).then_some(item)
        });
        attach(self, &forwarder.input());
        forwarder.output()
    }

    fn with_timeout(&self, after: Duration) -> SupplierRef<T> {
        decorator::supplier_with_timeout(Rc::clone(self), after)
    }

    fn map_error(&self, map: impl FnOnce(&StreamError) -> StreamError + 'static) -> SupplierRef<T> {
        decorator::map_error(Rc::clone(self), map)
    }

    fn when_end_of_stream(&self, callback: impl FnOnce() + 'static) -> SupplierRef<T> {
        decorator::remap_end_of_stream(Rc::clone(self), move |end_of_stream| {
            end_of_stream.when_result(move |_| callback());
            end_of_stream
        })
    }

    fn when_exception(&self, callback: impl FnOnce(&StreamError) + 'static) -> SupplierRef<T> {
        decorator::remap_end_of_stream(Rc::clone(self), move |end_of_stream| {
            end_of_stream.when_exception(callback);
            end_of_stream
        })
    }
}

/// 把上游接入转发器输入；绑定失败时转发器以同一错误终结，错误经由下游的完成信号暴露。
fn attach<T: 'static>(source: &SupplierRef<T>, input: &ConsumerRef<T>) {
    if let Err(error) = bind(source, input) {
        input.close_with_error(error);
    }
}

/// 消费方扩展。
pub trait ConsumerExt<T: 'static> {
    /// 返回可在任意 tick 绑定的等价消费方。
    ///
    /// 已声明 `LATE_BINDING` 时原样返回，否则立即把一个恒等转发器的输出绑定到它并返回转发器输入。
    fn with_late_binding(&self) -> Result<ConsumerRef<T>, StreamError>;

    fn with_timeout(&self, after: Duration) -> ConsumerRef<T>;

    fn remap_acknowledgement(
        &self,
        remap: impl FnOnce(Promise<()>) -> Promise<()>,
    ) -> ConsumerRef<T>;

    /// 观察 acknowledgement 的成功完成。
    fn when_acknowledged(&self, callback: impl FnOnce() + 'static) -> ConsumerRef<T>;
}

impl<T: 'static> ConsumerExt<T> for ConsumerRef<T> {
    fn with_late_binding(&self) -> Result<ConsumerRef<T>, StreamError> {
        if self.capabilities().contains(Capability::LateBinding) {
            return Ok(Rc::clone(self));
        }
        let forwarder = Forwarder::identity(&self.scheduler(), "consumer.late_binding");
        bind(&forwarder.output(), self)?;
        Ok(forwarder.input())
    }

    fn with_timeout(&self, after: Duration) -> ConsumerRef<T> {
        decorator::consumer_with_timeout(Rc::clone(self), after)
    }

    fn remap_acknowledgement(
        &self,
        remap: impl FnOnce(Promise<()>) -> Promise<()>,
    ) -> ConsumerRef<T> {
        decorator::remap_acknowledgement(Rc::clone(self), remap)
    }

    fn when_acknowledged(&self, callback: impl FnOnce() + 'static) -> ConsumerRef<T> {
        decorator::remap_acknowledgement(Rc::clone(self), move |acknowledgement| {
            acknowledgement.when_result(move |_| callback());
            acknowledgement
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        error::ProtocolViolation,
        scheduler::Scheduler,
        supplier,
    };

    #[test]
    fn late_binding_wrapper_binds_in_later_tick() {
        let scheduler = Scheduler::new();
        let source = supplier::of_values(&scheduler, vec![1_u8, 2, 3])
            .with_late_binding()
            .expect("包装");
        scheduler.post(|| {});
        scheduler.run().expect("推进 tick");
        assert_eq!(scheduler.block_on(&source.to_list().expect("绑定")), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn unwrapped_leaf_rejects_late_binding() {
        let scheduler = Scheduler::new();
        let source = supplier::of_value(&scheduler, 1_u8);
        scheduler.post(|| {});
        scheduler.run().expect("推进 tick");
        let error = source.to_list().expect_err("跨 tick 绑定应失败");
        assert!(matches!(
            error,
            StreamError::Protocol(ProtocolViolation::LateBinding { .. })
        ));
    }

    #[test]
    fn observers_fire_once() {
        let scheduler = Scheduler::new();
        let ended = Rc::new(Cell::new(0));
        let counter = Rc::clone(&ended);
        let result = supplier::of_iter(&scheduler, 0..4_u32)
            .filter(|value| value % 2 == 1)
            .when_end_of_stream(move || counter.set(counter.get() + 1))
            .to_list()
            .expect("绑定");
        assert_eq!(scheduler.block_on(&result), Ok(vec![1, 3]));
        scheduler.run().expect("排空");
        assert_eq!(ended.get(), 1);
    }
}
