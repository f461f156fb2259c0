//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为推送式流引擎提供统一的错误域：协议违规、上游数据错误、下游拒绝、超时都汇聚到 [`StreamError`]；
//! - 错误需要沿绑定关系双向传播并被多个观察者读取，因此必须 `Clone`，且比较语义稳定。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`，保持与 `std::error::Error` 生态兼容；
//! - 每个错误提供稳定错误码（见 [`codes`]），日志与告警只依赖错误码而非文案；
//! - 协议违规（重复绑定、跨 tick 绑定等）属于编程错误，以 `Err` 快速失败返回给调用方。
//!
//! ## 扩展建议（How）
//! - 业务错误优先使用 [`StreamError::failed`] 携带自定义错误码；
//! - 外部库错误通过 [`StreamError::other`] 包装，`PartialEq` 以指针身份比较，保证“原始错误原样到达”可被断言。

use std::{borrow::Cow, error::Error as StdError, fmt, sync::Arc, time::Duration};

use thiserror::Error;

/// 稳定错误码集合。
///
/// 错误码采用 `stream.<类别>.<细分>` 命名，供日志字段 `code` 与上层告警规则引用。
pub mod codes {
    /// 组件已绑定后再次绑定。
    pub const PROTOCOL_ALREADY_BOUND: &str = "stream.protocol.already_bound";
    /// 未声明 `LATE_BINDING` 的组件在创建 tick 之外被绑定。
    pub const PROTOCOL_LATE_BINDING: &str = "stream.protocol.late_binding";
    /// 拉取端在上一次 `take` 尚未完成时再次 `take`。
    pub const PROTOCOL_CONCURRENT_TAKE: &str = "stream.protocol.concurrent_take";
    /// 组件进入终态后仍被推送数据。
    pub const PROTOCOL_PUSH_AFTER_TERMINAL: &str = "stream.protocol.push_after_terminal";
    /// 调度器在运行中被再次驱动。
    pub const PROTOCOL_REENTRANT_RUN: &str = "stream.protocol.reentrant_run";
    /// 完成信号未在时限内到达。
    pub const TIMEOUT: &str = "stream.timeout";
    /// 调度器任务耗尽但目标 Promise 仍未完成。
    pub const STALLED: &str = "stream.stalled";
    /// 单次运行超过配置的 tick 预算。
    pub const TICK_BUDGET_EXHAUSTED: &str = "stream.tick_budget_exhausted";
    /// 外部错误的兜底错误码。
    pub const OTHER: &str = "stream.other";
}

/// 绑定关系中的角色，用于协议违规的上下文描述。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// 数据提供方。
    Supplier,
    /// 数据消费方。
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Supplier => f.write_str("supplier"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// 流协议违规。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“编程错误”与“数据错误”。协议违规意味着调用方违反了绑定/背压契约，
///   必须立即暴露，不能被当作可重试的数据失败吞掉。
/// - **契约 (What)**：每个变体携带出错组件的静态标签（`component`），与日志字段保持一致。
/// - **设计权衡 (Trade-offs)**：组件标签使用 `&'static str`，避免在热路径上分配；代价是无法携带实例级 ID，
///   需要时可配合 tracing span 追踪。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// 同一组件被绑定两次。
    #[error("{role} `{component}` is already bound")]
    AlreadyBound {
        role: Role,
        component: &'static str,
    },

    /// 组件未声明 `LATE_BINDING`，却在创建 tick 之后被绑定。
    #[error(
        "`{component}` created in tick {created} was bound in tick {bound} without LATE_BINDING"
    )]
    LateBinding {
        component: &'static str,
        created: u64,
        bound: u64,
    },

    /// 拉取端存在尚未完成的 `take`。
    #[error("`{component}` already has a pending take")]
    ConcurrentTake { component: &'static str },

    /// 终态之后仍向组件推送数据。
    #[error("`{component}` received an item after reaching a terminal state")]
    PushAfterTerminal { component: &'static str },

    /// 在任务回调内部再次驱动调度器。
    #[error("scheduler is already running")]
    ReentrantRun,
}

impl ProtocolViolation {
    /// 返回对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolViolation::AlreadyBound { .. } => codes::PROTOCOL_ALREADY_BOUND,
            ProtocolViolation::LateBinding { .. } => codes::PROTOCOL_LATE_BINDING,
            ProtocolViolation::ConcurrentTake { .. } => codes::PROTOCOL_CONCURRENT_TAKE,
            ProtocolViolation::PushAfterTerminal { .. } => codes::PROTOCOL_PUSH_AFTER_TERMINAL,
            ProtocolViolation::ReentrantRun => codes::PROTOCOL_REENTRANT_RUN,
        }
    }
}

/// 流引擎错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：同一个错误会同时出现在供应方的 end-of-stream、消费方的 acknowledgement 以及绑定方的
///   组合完成信号上，因此采用可廉价克隆的枚举（外部错误以 `Arc` 共享）。
/// - **契约 (What)**：
///   - [`StreamError::code`] 返回稳定错误码；
///   - `PartialEq` 对 [`StreamError::Other`] 采用指针相等，确保断言“原始错误未被替换”；
///   - 枚举标记 `#[non_exhaustive]`，调用方匹配时需保留兜底分支。
/// - **设计权衡 (Trade-offs)**：`Failed` 的错误码是 `&'static str`，约束业务方预先声明错误码常量，
///   换取日志聚合的稳定性。
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum StreamError {
    /// 协议违规，详见 [`ProtocolViolation`]。
    #[error("stream protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// 完成信号超时。
    #[error("stream timed out after {0:?}")]
    Timeout(Duration),

    /// 调度器已无任务可执行，目标仍未完成。
    #[error("scheduler went idle before the awaited completion")]
    Stalled,

    /// 单次运行超过 tick 预算，通常意味着活锁。
    #[error("scheduler exceeded its budget of {0} ticks in a single run")]
    TickBudgetExhausted(u64),

    /// 业务侧失败，携带自定义错误码。
    #[error("[{code}] {message}")]
    Failed {
        code: &'static str,
        message: Cow<'static, str>,
    },

    /// 外部错误包装。
    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync>),
}

impl StreamError {
    /// 构造业务失败。
    pub fn failed(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        StreamError::Failed {
            code,
            message: message.into(),
        }
    }

    /// 包装任意外部错误。
    pub fn other(error: impl StdError + Send + Sync + 'static) -> Self {
        StreamError::Other(Arc::new(error))
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::Protocol(violation) => violation.code(),
            StreamError::Timeout(_) => codes::TIMEOUT,
            StreamError::Stalled => codes::STALLED,
            StreamError::TickBudgetExhausted(_) => codes::TICK_BUDGET_EXHAUSTED,
            StreamError::Failed { code, .. } => *code,
            StreamError::Other(_) => codes::OTHER,
        }
    }

    /// 是否为协议违规（编程错误）。
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, StreamError::Protocol(_))
    }
}

impl PartialEq for StreamError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StreamError::Protocol(a), StreamError::Protocol(b)) => a == b,
            (StreamError::Timeout(a), StreamError::Timeout(b)) => a == b,
            (StreamError::Stalled, StreamError::Stalled) => true,
            (StreamError::TickBudgetExhausted(a), StreamError::TickBudgetExhausted(b)) => a == b,
            (
                StreamError::Failed {
                    code: ca,
                    message: ma,
                },
                StreamError::Failed {
                    code: cb,
                    message: mb,
                },
            ) => ca == cb && ma == mb,
            (StreamError::Other(a), StreamError::Other(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
