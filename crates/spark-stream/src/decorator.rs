//! 完成信号装饰器。
//!
//! # 教案式说明
//! - **意图 (Why)**：超时、错误改写、完成观察等需求只关心“完成信号”本身，不应为此再插入一个转发器
//!   （多一次缓冲、多一个 tick）。装饰器实现同一契约，除被改写的完成信号外逐一转发。
//! - **执行逻辑 (How)**：
//!   1. 构造时取出被包装组件的完成信号，交给改写函数得到新信号；
//!   2. 绑定时对端登记的是装饰器，因此对端观察到的是改写后的信号；
//!   3. 改写后的信号失败且被包装组件仍开放时，以同一错误关闭被包装组件（只持有弱引用，不延长其生命周期）。
//! - **契约 (What)**：能力集合与被包装组件一致；迟绑定检查仍由被包装组件执行。
//! - **设计权衡 (Trade-offs)**：超时计时器在构造时启动，而不是在绑定时。

use std::{
    rc::{Rc, Weak},
    time::Duration,
};

use tracing::debug;

use crate::{
    acceptor::Acceptor,
    capability::Capabilities,
    contract::{ConsumerRef, StreamConsumer, StreamSupplier, SupplierRef},
    error::StreamError,
    promise::Promise,
    scheduler::Scheduler,
};

/// 改写了 end-of-stream 的供应方。
pub struct SupplierDecorator<T: 'static> {
    inner: SupplierRef<T>,
    end_of_stream: Promise<()>,
}

impl<T: 'static> SupplierDecorator<T> {
    pub fn new(inner: SupplierRef<T>, remap: impl FnOnce(Promise<()>) -> Promise<()>) -> Rc<Self> {
        let end_of_stream = remap(inner.end_of_stream());
        let target: Weak<dyn StreamSupplier<T>> = Rc::downgrade(&inner);
        end_of_stream.when_exception(move |error| {
            if let Some(inner) = target.upgrade() {
                debug!(code = error.code(), "remapped end of stream failed");
                inner.close_with_error(error.clone());
            }
        });
        Rc::new(Self {
            inner,
            end_of_stream,
        })
    }

    pub fn inner(&self) -> &SupplierRef<T> {
        &self.inner
    }
}

impl<T: 'static> StreamSupplier<T> for SupplierDecorator<T> {
    fn set_consumer(&self, consumer: ConsumerRef<T>) -> Result<(), StreamError> {
        self.inner.set_consumer(consumer)
    }

    fn check_bindable(&self) -> Result<(), StreamError> {
        self.inner.check_bindable()
    }

    fn resume(&self, acceptor: Acceptor<T>) {
        self.inner.resume(acceptor);
    }

    fn suspend(&self) {
        self.inner.suspend();
    }

    fn close(&self) {
        self.inner.close();
    }

    fn close_with_error(&self, error: StreamError) {
        self.inner.close_with_error(error);
    }

    fn end_of_stream(&self) -> Promise<()> {
        self.end_of_stream.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn scheduler(&self) -> Scheduler {
        self.inner.scheduler()
    }
}

/// 改写了 acknowledgement 的消费方。
pub struct ConsumerDecorator<T: 'static> {
    inner: ConsumerRef<T>,
    acknowledgement: Promise<()>,
}

impl<T: 'static> ConsumerDecorator<T> {
    pub fn new(inner: ConsumerRef<T>, remap: impl FnOnce(Promise<()>) -> Promise<()>) -> Rc<Self> {
        let acknowledgement = remap(inner.acknowledgement());
        let target: Weak<dyn StreamConsumer<T>> = Rc::downgrade(&inner);
        acknowledgement.when_exception(move |error| {
            if let Some(inner) = target.upgrade() {
                debug!(code = error.code(), "remapped acknowledgement failed");
                inner.close_with_error(error.clone());
            }
        });
        Rc::new(Self {
            inner,
            acknowledgement,
        })
    }

    pub fn inner(&self) -> &ConsumerRef<T> {
        &self.inner
    }
}

impl<T: 'static> StreamConsumer<T> for ConsumerDecorator<T> {
    fn set_supplier(&self, supplier: SupplierRef<T>) -> Result<(), StreamError> {
        self.inner.set_supplier(supplier)
    }

    fn check_bindable(&self) -> Result<(), StreamError> {
        self.inner.check_bindable()
    }

    fn data_acceptor(&self) -> Option<Acceptor<T>> {
        self.inner.data_acceptor()
    }

    fn acknowledgement(&self) -> Promise<()> {
        self.acknowledgement.clone()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn close_with_error(&self, error: StreamError) {
        self.inner.close_with_error(error);
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn scheduler(&self) -> Scheduler {
        self.inner.scheduler()
    }
}

pub fn remap_end_of_stream<T: 'static>(
    supplier: SupplierRef<T>,
    remap: impl FnOnce(Promise<()>) -> Promise<()>,
) -> SupplierRef<T> {
    SupplierDecorator::new(supplier, remap)
}

pub fn remap_acknowledgement<T: 'static>(
    consumer: ConsumerRef<T>,
    remap: impl FnOnce(Promise<()>) -> Promise<()>,
) -> ConsumerRef<T> {
    ConsumerDecorator::new(consumer, remap)
}

/// 改写供应方的失败原因；成功原样透传。
pub fn map_error<T: 'static>(
    supplier: SupplierRef<T>,
    map: impl FnOnce(&StreamError) -> StreamError + 'static,
) -> SupplierRef<T> {
    remap_end_of_stream(supplier, move |end_of_stream| end_of_stream.map_err(map))
}

/// end-of-stream 在逻辑时间 `after` 内未到达则以 [`StreamError::Timeout`] 终结。
pub fn supplier_with_timeout<T: 'static>(
    supplier: SupplierRef<T>,
    after: Duration,
) -> SupplierRef<T> {
    let scheduler = supplier.scheduler();
    remap_end_of_stream(supplier, move |end_of_stream| {
        end_of_stream.timeout(&scheduler, after)
    })
}

/// acknowledgement 在逻辑时间 `after` 内未到达则以 [`StreamError::Timeout`] 终结。
pub fn consumer_with_timeout<T: 'static>(
    consumer: ConsumerRef<T>,
    after: Duration,
) -> ConsumerRef<T> {
    let scheduler = consumer.scheduler();
    remap_acknowledgement(consumer, move |acknowledgement| {
        acknowledgement.timeout(&scheduler, after)
    })
}
