//! # outcome：操作终态模型
//!
//! ## 角色定位（Why）
//! - 操作（Operation）一旦结束，必须且只能落入七种终态之一；终态同时也是跨越操作边界的唯一失败表达，
//!   客户代码抛出的错误、传输失败、超时都会被折叠成这里的某个变体；
//! - Front 与 Back 各自持有镜像状态机，双方通过终止类票据对齐终态。
//!
//! ## 契约（What）
//! - [`Outcome`] 为封闭枚举，不携带负载，可直接作为统计直方图的键；
//! - [`Outcome::ALL`] 给出稳定的遍历顺序，`operation_stats()` 依此补零输出。

use core::fmt;

use serde::{Deserialize, Serialize};

/// 操作的终态分类。
///
/// # 教案式说明
/// - **意图 (Why)**：以单一枚举统一“正常完成”和六类异常终止，上层只需匹配终态即可决定重试或告警；
/// - **契约 (What)**：每个操作至多被赋予一个终态，且赋值后不可更改（由 `TerminationManager` 保证）；
/// - **风险 (Trade-offs)**：终态本身不携带错误详情，诊断信息需通过
///   [`OperationContext::failure`](crate::context::OperationContext::failure) 追查。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// 双方均按协议自然完成。
    Completed,
    /// 任意一方显式取消。
    Cancelled,
    /// 截止时间先于自然完成到达。
    Expired,
    /// 收到畸形、乱序或无法处理的票据。
    ReceptionFailure,
    /// 本地传输拒绝或发送失败。
    TransmissionFailure,
    /// 服务端业务代码（Servicer）抛出错误。
    ServicerFailure,
    /// 客户端消费代码（Ingestor/Consumer）抛出错误。
    ServicedFailure,
}

impl Outcome {
    /// 全部终态，按声明顺序排列。
    pub const ALL: [Outcome; 7] = [
        Outcome::Completed,
        Outcome::Cancelled,
        Outcome::Expired,
        Outcome::ReceptionFailure,
        Outcome::TransmissionFailure,
        Outcome::ServicerFailure,
        Outcome::ServicedFailure,
    ];

    /// 稳定的蛇形标识，用于日志字段与指标标签。
    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Cancelled => "cancelled",
            Outcome::Expired => "expired",
            Outcome::ReceptionFailure => "reception_failure",
            Outcome::TransmissionFailure => "transmission_failure",
            Outcome::ServicerFailure => "servicer_failure",
            Outcome::ServicedFailure => "serviced_failure",
        }
    }

    /// 是否为异常终止。
    pub const fn is_abortive(self) -> bool {
        !matches!(self, Outcome::Completed)
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_indexed_by_declaration_order() {
        for (position, outcome) in Outcome::ALL.iter().enumerate() {
            assert_eq!(outcome.index(), position);
        }
        assert!(!Outcome::Completed.is_abortive());
        assert!(Outcome::Expired.is_abortive());
    }
}
