//! 绑定协议。
//!
//! # 教案式说明
//! - **意图 (Why)**：供应方与消费方必须互相登记恰好一次，并得到一个“两侧都完成才算完成”的组合信号；
//!   这一步集中在 [`bind`]，组合子内部的所有连接也经由它完成。
//! - **执行逻辑 (How)**：
//!   1. 先对两侧调用 `check_bindable`，任一失败立即返回且两侧状态不变；
//!      随后 `supplier.set_consumer(consumer)` 与 `consumer.set_supplier(supplier)`；
//!   2. 组合完成信号 = `end_of_stream.both(acknowledgement)`，失败取最先到达的错误；
//!   3. 若消费方在绑定时就绪（`data_acceptor()` 返回 `Some`），立即以该 Acceptor `resume` 供应方。
//! - **契约 (What)**：任一方失败时，基础实现会以相同错误关闭另一方（见 `base` 模块），
//!   因此 `completion()` 观察到的错误就是最初的错误本身。

use std::rc::Rc;

use tracing::debug;

use crate::{
    contract::{
        consumer::{ConsumerRef, StreamConsumerWithResult},
        supplier::SupplierRef,
    },
    error::StreamError,
    promise::Promise,
};

/// 一次绑定产生的三个完成信号。
#[derive(Clone, Debug)]
pub struct StreamCompletion {
    supplier_end_of_stream: Promise<()>,
    consumer_acknowledgement: Promise<()>,
    completion: Promise<()>,
}

impl StreamCompletion {
    pub fn supplier_end_of_stream(&self) -> &Promise<()> {
        &self.supplier_end_of_stream
    }

    pub fn consumer_acknowledgement(&self) -> &Promise<()> {
        &self.consumer_acknowledgement
    }

    /// 两侧合取后的完成信号。
    pub fn completion(&self) -> &Promise<()> {
        &self.completion
    }
}

/// 绑定结果加消费方产出的值。
#[derive(Clone, Debug)]
pub struct StreamResult<R> {
    completion: StreamCompletion,
    result: Promise<R>,
}

impl<R> StreamResult<R> {
    pub fn completion(&self) -> &StreamCompletion {
        &self.completion
    }

    pub fn result(&self) -> &Promise<R> {
        &self.result
    }

    pub fn into_result(self) -> Promise<R> {
        self.result
    }
}

/// 把供应方绑定到消费方。
pub fn bind<T: 'static>(
    supplier: &SupplierRef<T>,
    consumer: &ConsumerRef<T>,
) -> Result<StreamCompletion, StreamError> {
    supplier.check_bindable()?;
    consumer.check_bindable()?;
    supplier.set_consumer(Rc::clone(consumer))?;
    consumer.set_supplier(Rc::clone(supplier))?;

    let supplier_end_of_stream = supplier.end_of_stream();
    let consumer_acknowledgement = consumer.acknowledgement();
    let completion = supplier_end_of_stream.both(&consumer_acknowledgement);
    debug!(
        supplier = ?supplier.capabilities(),
        consumer = ?consumer.capabilities(),
        tick = supplier.scheduler().tick(),
        "stream bound"
    );

    if let Some(acceptor) = consumer.data_acceptor() {
        supplier.resume(acceptor);
    }

    Ok(StreamCompletion {
        supplier_end_of_stream,
        consumer_acknowledgement,
        completion,
    })
}

/// 绑定到带结果的消费方，并一并返回其结果信号。
pub fn bind_with_result<T, R, C>(
    supplier: &SupplierRef<T>,
    consumer: Rc<C>,
) -> Result<StreamResult<R>, StreamError>
where
    T: 'static,
    R: 'static,
    C: StreamConsumerWithResult<T, R>,
{
    let result = consumer.result();
    let consumer: ConsumerRef<T> = consumer;
    let completion = bind(supplier, &consumer)?;
    Ok(StreamResult { completion, result })
}
