//! 推拉桥接。
//!
//! # 教案式说明
//! - **意图 (Why)**：推模型的流需要与拉模型的调用方（逐个 `take` 的协程、逐个 `put` 的生产循环）互通，
//!   同时保留背压：桥接组件内部的缓冲必须有界。
//! - **结构 (How)**：
//!   - [`StreamBuffer`]：推 → 拉。上游供应方推入，调用方 `take`；超过高水位挂起上游，回落到恢复阈值再恢复；
//!   - [`StreamQueue`]：拉 → 推。调用方 `add`/`put`，下游消费方按就绪声明接收；缓冲超过高水位时 `put` 的
//!     Promise 等到缓冲清空才完成。
//! - **契约 (What)**：水位来自 [`BufferConfig`](crate::config::BufferConfig)；end-of-stream 在缓冲中以哨兵形式
//!   排队，与普通元素同序交付。

mod buffer;
mod queue;

pub use buffer::{BufferInput, StreamBuffer};
pub use queue::{QueueOutput, StreamQueue};
