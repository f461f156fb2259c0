//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 流引擎的可调参数（调度器公平性、桥接缓冲水位）需要从宿主配置文件装载，而非散落在调用点的魔法数字；
//! - 所有结构体派生 `serde`，宿主可以把 `[stream]` 段直接嵌入自己的 TOML 配置。
//!
//! ## 契约（What）
//! - 字段均有默认值（`#[serde(default)]`），未知字段直接拒绝（`deny_unknown_fields`）；
//! - [`StreamConfig::from_toml_str`] 在解析后立即调用 [`StreamConfig::validate`]，非法组合以 [`ConfigError`] 返回。
//!
//! ## 注意事项（Trade-offs）
//! - `low_water_mark` 缺省时等于 `high_water_mark`：桥接在刚回落到水位线时即恢复上游，吞吐优先；
//!   若希望减少抖动，可显式配置更低的恢复阈值。

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 默认的单次生产批量。
pub const DEFAULT_PRODUCE_BATCH: usize = 1024;
/// 默认的桥接高水位。
pub const DEFAULT_HIGH_WATER_MARK: usize = 256;

/// 配置装载与校验错误。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// TOML 语法或字段类型错误。
    #[error("failed to parse stream configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// 字段取值违反约束。
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: Cow<'static, str>,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 流引擎顶层配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub scheduler: SchedulerConfig,
    pub buffer: BufferConfig,
}

impl StreamConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StreamConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.buffer.validate()
    }
}

/// 调度器配置。
///
/// - `produce_batch`：迭代型供应方单次生产的最大元素数，超过后让出调度器，保证同队列其他任务的公平性；
/// - `max_ticks_per_run`：单次 `run` 允许执行的最大任务数，`None` 表示不限，用于在测试中捕获活锁。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub produce_batch: usize,
    pub max_ticks_per_run: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            produce_batch: DEFAULT_PRODUCE_BATCH,
            max_ticks_per_run: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.produce_batch == 0 {
            return Err(ConfigError::invalid(
                "scheduler.produce_batch",
                "must be greater than zero",
            ));
        }
        if self.max_ticks_per_run == Some(0) {
            return Err(ConfigError::invalid(
                "scheduler.max_ticks_per_run",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// 推拉桥接的缓冲水位配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// 缓冲元素数超过该值时挂起上游。
    pub high_water_mark: usize,
    /// 缓冲回落到该值及以下时恢复上游；缺省等于 `high_water_mark`。
    pub low_water_mark: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            low_water_mark: None,
        }
    }
}

impl BufferConfig {
    /// 以给定高水位构造配置，恢复阈值取默认。
    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self {
            high_water_mark,
            low_water_mark: None,
        }
    }

    /// 实际生效的恢复阈值。
    pub fn resume_threshold(&self) -> usize {
        self.low_water_mark.unwrap_or(self.high_water_mark)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_water_mark == 0 {
            return Err(ConfigError::invalid(
                "buffer.high_water_mark",
                "must be greater than zero",
            ));
        }
        if let Some(low) = self.low_water_mark
            && low > self.high_water_mark
        {
            return Err(ConfigError::invalid(
                "buffer.low_water_mark",
                format!(
                    "{low} exceeds high_water_mark {}",
                    self.high_water_mark
                ),
            ));
        }
        Ok(())
    }
}
