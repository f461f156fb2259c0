//! 组件能力标记。
//!
//! # 教案式说明
//! - **意图 (Why)**：组合子需要在运行时判断上下游组件能否跨 tick 绑定、挂起是否立即生效、是否为终端 Sink，
//!   这类判断不应依赖具体类型，而应依赖组件自报的能力集合。
//! - **契约 (What)**：[`Capabilities`] 是一个按位存储的有限集合，`Copy` 且比较廉价；
//!   [`Capability`] 枚举给出所有可声明的能力。
//! - **设计权衡 (Trade-offs)**：选择 `u8` 位图而非 `HashSet`，零分配且可在 `const` 上下文构造；
//!   能力种类超过 8 个时需扩宽底层整数。

use std::{fmt, ops::BitOr};

/// 可声明的单项能力。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Capability {
    /// 允许在创建所在 tick 之外完成绑定。
    LateBinding,
    /// `suspend` 返回后不会再推送任何数据。
    ImmediateSuspend,
    /// 终端 Sink，没有下游。
    Terminal,
}

impl Capability {
    /// 全部能力，按位序排列。
    pub const ALL: [Capability; 3] = [
        Capability::LateBinding,
        Capability::ImmediateSuspend,
        Capability::Terminal,
    ];

    const fn bit(self) -> u8 {
        match self {
            Capability::LateBinding => 1,
            Capability::ImmediateSuspend => 1 << 1,
            Capability::Terminal => 1 << 2,
        }
    }

    /// 返回用于日志与调试输出的大写名称。
    pub const fn name(self) -> &'static str {
        match self {
            Capability::LateBinding => "LATE_BINDING",
            Capability::ImmediateSuspend => "IMMEDIATE_SUSPEND",
            Capability::Terminal => "TERMINAL",
        }
    }
}

/// 能力集合。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// 空集合。
    pub const EMPTY: Capabilities = Capabilities(0);

    /// 仅包含单项能力的集合。
    pub const fn of(capability: Capability) -> Self {
        Capabilities(capability.bit())
    }

    /// 追加一项能力。
    pub const fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    /// 移除一项能力。
    pub const fn without(self, capability: Capability) -> Self {
        Capabilities(self.0 & !capability.bit())
    }

    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 两个集合的交集，用于组合子推导“上下游共同具备”的能力。
    pub const fn intersection(self, other: Capabilities) -> Self {
        Capabilities(self.0 & other.0)
    }

    /// 按位序迭代集合中的能力。
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }
}

impl From<Capability> for Capabilities {
    fn from(capability: Capability) -> Self {
        Capabilities::of(capability)
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOr<Capability> for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Self::Output {
        self.with(rhs)
    }
}

impl BitOr for Capability {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Self::Output {
        Capabilities::of(self).with(rhs)
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Capabilities::EMPTY, |set, capability| set.with(capability))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(Capability::name))
            .finish()
    }
}
