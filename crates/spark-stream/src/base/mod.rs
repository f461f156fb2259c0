//! 供应方/消费方的基础实现。
//!
//! 组件作者实现 [`SupplierBehavior`] 或 [`ConsumerBehavior`]，再以 [`BaseSupplier::new`] /
//! [`BaseConsumer::new`] 包装即可获得完整的协议语义；需要回指宿主的组合子使用 `new_cyclic`。

pub mod consumer;
pub mod supplier;

pub use consumer::{BaseConsumer, ConsumerBehavior, ConsumerCore};
pub use supplier::{BaseSupplier, SupplierBehavior, SupplierCore};
