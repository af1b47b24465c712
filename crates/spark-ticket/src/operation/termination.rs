//! # termination：终态裁决
//!
//! ## 核心意图（Why）
//! - 一个操作的自然完成取决于最多四个信号：本地发送完毕（emission）、发送票据全部交给链路（transmission）、
//!   对端流结束（reception）、接收负载全部交给客户代码（ingestion）；
//! - 取消、远端失败、本地失败与过期可能同时发生，必须保证“先到者胜出，后到者无效”。
//!
//! ## 行为契约（What）
//! - 每个信号方法返回 `true` 当且仅当本次调用让操作进入终态；
//! - 终态写入后，[`TerminationManager::take_announcement`] 恰好返回一次该终态，由操作负责对外宣告。

use crate::{outcome::Outcome, ticket::SubscriptionKind};

use super::transmission::TransmissionPolicy;

const EMISSION: u8 = 0b0001;
const TRANSMISSION: u8 = 0b0010;
const RECEPTION: u8 = 0b0100;
const INGESTION: u8 = 0b1000;

/// 单侧终态管理器。
#[derive(Debug)]
pub(crate) struct TerminationManager {
    required: u8,
    satisfied: u8,
    outcome: Option<Outcome>,
    announced: bool,
}

impl TerminationManager {
    fn with_requirements(required: u8) -> Self {
        Self {
            required,
            satisfied: 0,
            outcome: None,
            announced: false,
        }
    }

    /// Front 侧：不订阅回程时只需本方向送达。
    pub(crate) fn front(subscription: SubscriptionKind) -> Self {
        match subscription {
            SubscriptionKind::None => Self::with_requirements(EMISSION | TRANSMISSION),
            SubscriptionKind::Full | SubscriptionKind::TerminationOnly => {
                Self::with_requirements(EMISSION | TRANSMISSION | RECEPTION | INGESTION)
            }
        }
    }

    /// Back 侧：静默策略下永远不会发送，发送信号不参与裁决。
    pub(crate) fn back(policy: TransmissionPolicy) -> Self {
        match policy {
            TransmissionPolicy::Silent => Self::with_requirements(EMISSION | RECEPTION | INGESTION),
            TransmissionPolicy::Full | TransmissionPolicy::TerminationOnly => {
                Self::with_requirements(EMISSION | TRANSMISSION | RECEPTION | INGESTION)
            }
        }
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub(crate) fn is_active(&self) -> bool {
        self.outcome.is_none()
    }

    pub(crate) fn emission_complete(&mut self) -> bool {
        self.satisfy(EMISSION)
    }

    pub(crate) fn transmission_complete(&mut self) -> bool {
        self.satisfy(TRANSMISSION)
    }

    /// `Some(outcome)` 表示对端以终止票据结束了操作。
    pub(crate) fn reception_complete(&mut self, outcome: Option<Outcome>) -> bool {
        match outcome {
            Some(outcome) => self.abort(outcome),
            None => self.satisfy(RECEPTION),
        }
    }

    pub(crate) fn ingestion_complete(&mut self) -> bool {
        self.satisfy(INGESTION)
    }

    /// 以给定终态短路；已有终态时无效。
    pub(crate) fn abort(&mut self, outcome: Outcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    pub(crate) fn expire(&mut self) -> bool {
        self.abort(Outcome::Expired)
    }

    /// 终态写入后首次调用返回该终态，此后返回 `None`。
    pub(crate) fn take_announcement(&mut self) -> Option<Outcome> {
        if self.announced {
            return None;
        }
        let outcome = self.outcome?;
        self.announced = true;
        Some(outcome)
    }

    fn satisfy(&mut self, signal: u8) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.satisfied |= signal;
        if self.satisfied & self.required == self.required {
            self.outcome = Some(Outcome::Completed);
            return true;
        }
        false
    }
}
