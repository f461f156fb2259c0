#![deny(unsafe_code)]

//! # spark-stream
//!
//! ## 定位与职责（Why）
//! - 提供单线程协作调度下的推送式流处理引擎：供应方经由 Acceptor 把元素推给消费方，
//!   消费方以 resume/suspend 表达背压，两侧各自给出完成信号并在绑定处合取；
//! - 在此契约之上提供拼接、动态切换、收集、推拉桥接、完成信号装饰与迟绑定包装等组合子。
//!
//! ## 架构嵌入（Where）
//! - [`contract`]：供应方/消费方契约与一次性绑定协议；
//! - [`base`]：契约的公共状态机，具体组件只实现行为钩子；
//! - [`supplier`]、[`consumer`]、[`forwarder`]、[`switcher`]、[`bridge`]、[`decorator`]：组合子；
//! - [`scheduler`]、[`promise`]：协作式调度器与一次性完成信号；
//! - [`error`]、[`config`]、[`stats`]：错误域、配置与运行计数。
//!
//! ## 并发模型（Trade-offs）
//! - 引擎内部全部使用 `Rc`/`RefCell`/`Cell`，组件不是 `Send`；跨线程交互应在宿主侧通过桥接组件完成；
//! - 任何 `RefCell` 借用都不会跨越对其他组件的调用，重入由“已投递”标志与投递到调度器的后续任务处理。

pub mod acceptor;
pub mod base;
pub mod bridge;
pub mod capability;
pub mod config;
pub mod consumer;
pub mod contract;
pub mod decorator;
pub mod error;
pub mod ext;
pub mod forwarder;
pub mod promise;
pub mod scheduler;
pub mod stats;
pub mod supplier;
pub mod switcher;

pub use acceptor::Acceptor;
pub use bridge::{StreamBuffer, StreamQueue};
pub use capability::{Capabilities, Capability};
pub use config::{BufferConfig, ConfigError, SchedulerConfig, StreamConfig};
pub use contract::{
    ConsumerRef, StreamCompletion, StreamConsumer, StreamConsumerWithResult, StreamResult,
    StreamStatus, StreamSupplier, SupplierRef, bind, bind_with_result,
};
pub use error::{ProtocolViolation, Role, StreamError};
pub use ext::{ConsumerExt, SupplierExt};
pub use forwarder::Forwarder;
pub use promise::{Promise, SettablePromise};
pub use scheduler::{RunReport, Scheduler, TimerHandle};
pub use stats::{StatsRegistry, StatsSnapshot, StreamStats};
pub use switcher::StreamSwitcher;

/// 常用类型与组合子入口的集中导入。
pub mod prelude {
    pub use crate::{
        Acceptor, BufferConfig, Capabilities, Capability, ConsumerExt, ConsumerRef, Promise,
        Scheduler, SettablePromise, StreamBuffer, StreamCompletion, StreamConsumer, StreamError,
        StreamQueue, StreamSupplier, StreamSwitcher, SupplierExt, SupplierRef, bind,
        bind_with_result, consumer, supplier,
    };
}
