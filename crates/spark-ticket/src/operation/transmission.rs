//! # transmission：出站票据编排
//!
//! ## 核心意图（Why）
//! - 把本地的“发送一个值 / 宣告完成 / 调整超时 / 授予额度 / 终止”转换为带序号的出站票据；
//! - 在对端额度耗尽时扣留负载票据，保持 FIFO，使完成票据永远不会越过仍被扣留的负载。
//!
//! ## 行为契约（What）
//! - 序号在票据被取出交给链路时分配，因此序号连续且与链路上的顺序一致；
//! - 超时与额度以“捎带”方式附着在下一张出站票据上；没有可捎带的票据时生成 `CONTROL`；
//! - 终止后只会再发出至多一张终止票据；Front 若从未发出过任何票据，则对端无从知晓该操作，
//!   终止票据被省略。Back 的对端必然知晓操作，终止票据总会发出（策略为静默时除外）。
//!
//! ## 风险提示（Trade-offs）
//! - 对端额度未公布前视为不限额：先发出的票据可能超过对端稍后公布的初始额度，对端以本地队列吸收。

use std::{collections::VecDeque, sync::Arc, time::Duration};

use crate::{
    outcome::Outcome,
    ticket::{Payload, Segment, SegmentKind, SubscriptionKind},
};

/// 出站策略，由 Front 的订阅级别决定（仅对 Back 有意义，Front 恒为 `Full`）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransmissionPolicy {
    /// 发送全部票据。
    Full,
    /// 丢弃负载，仍发送完成、控制与终止票据。
    TerminationOnly,
    /// 不发送任何票据。
    Silent,
}

impl TransmissionPolicy {
    pub(crate) fn for_subscription(subscription: SubscriptionKind) -> Self {
        match subscription {
            SubscriptionKind::Full => TransmissionPolicy::Full,
            SubscriptionKind::TerminationOnly => TransmissionPolicy::TerminationOnly,
            SubscriptionKind::None => TransmissionPolicy::Silent,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransmissionManager {
    policy: TransmissionPolicy,
    next_sequence: u64,
    pending: VecDeque<Segment>,
    remote_window: Option<u64>,
    pending_timeout: Option<Duration>,
    pending_allowance: Option<u64>,
    advertised: bool,
    emitted_completion: bool,
    remote_complete: bool,
    termination: Option<Segment>,
    closed: bool,
    remote_aware: bool,
    /// 是否有票据泵任务在途；由操作在锁内维护。
    pub(crate) transmitting: bool,
}

impl TransmissionManager {
    pub(crate) fn new(policy: TransmissionPolicy) -> Self {
        Self {
            policy,
            next_sequence: 0,
            pending: VecDeque::new(),
            remote_window: None,
            pending_timeout: None,
            pending_allowance: None,
            advertised: false,
            emitted_completion: false,
            remote_complete: false,
            termination: None,
            closed: false,
            remote_aware: false,
            transmitting: false,
        }
    }

    /// 对端已知晓本操作（Back 侧：操作由对端发起）。
    pub(crate) fn mark_remote_aware(&mut self) {
        self.remote_aware = true;
    }

    /// 排入发起票据（Front 专用，序号 0）。
    pub(crate) fn kick_off(&mut self, segment: Segment) {
        if segment.completes_stream() {
            self.emitted_completion = true;
        }
        self.pending.push_back(segment);
    }

    /// 本方向是否已经宣告完成。
    pub(crate) fn emitted_completion(&self) -> bool {
        self.emitted_completion
    }

    /// 排入一个值和/或完成标记；调用方负责保证完成只宣告一次。
    pub(crate) fn advance(&mut self, payload: Option<Payload>, complete: bool) {
        if complete {
            self.emitted_completion = true;
        }
        if self.closed {
            return;
        }
        let payload = match self.policy {
            TransmissionPolicy::Full => payload,
            TransmissionPolicy::TerminationOnly => None,
            TransmissionPolicy::Silent => return,
        };
        let kind = match (complete, &payload) {
            (true, _) => SegmentKind::Completion,
            (false, Some(_)) => SegmentKind::Continuation,
            (false, None) => return,
        };
        let mut segment = Segment::new(kind);
        segment.payload = payload;
        self.pending.push_back(segment);
    }

    pub(crate) fn timeout(&mut self, timeout: Duration) {
        if self.closed || self.policy == TransmissionPolicy::Silent {
            return;
        }
        self.pending_timeout = Some(timeout);
    }

    /// 向对端追加额度。首次公布即使为零也必须发出，它为对端设定窗口；
    /// 对端已完成发送时额度没有意义，直接丢弃。
    pub(crate) fn allowance(&mut self, allowance: u64) {
        if self.closed || self.remote_complete || self.policy == TransmissionPolicy::Silent {
            return;
        }
        if allowance == 0 && self.advertised {
            return;
        }
        self.advertised = true;
        self.pending_allowance = Some(
            self.pending_allowance
                .map_or(allowance, |granted| granted.saturating_add(allowance)),
        );
    }

    /// 对端公布的额度：首次公布设定窗口，之后累加。
    pub(crate) fn add_remote_allowance(&mut self, allowance: u64) {
        self.remote_window = Some(
            self.remote_window
                .map_or(allowance, |window| window.saturating_add(allowance)),
        );
    }

    pub(crate) fn remote_complete(&mut self) {
        self.remote_complete = true;
        self.pending_allowance = None;
    }

    /// 终止出站方向。`notify` 为 `Some` 时排入对应终止票据，`details` 随之送达对端。
    pub(crate) fn abort(&mut self, notify: Option<Outcome>, details: Option<Arc<str>>) {
        if self.closed {
            return;
        }
        self.close();
        if let Some(outcome) = notify
            && self.policy != TransmissionPolicy::Silent
            && (self.remote_aware || self.next_sequence > 0)
        {
            let mut segment = Segment::new(SegmentKind::Termination(outcome));
            segment.details = details;
            self.termination = Some(segment);
        }
    }

    /// 自然完成后丢弃残余的控制信息。
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.pending_timeout = None;
        self.pending_allowance = None;
    }

    pub(crate) fn has_ready(&self) -> bool {
        self.termination.is_some()
            || (!self.closed
                && (self.front_sendable()
                    || self.pending_timeout.is_some()
                    || self.pending_allowance.is_some()))
    }

    /// 取出下一张可发送的票据并分配序号。
    pub(crate) fn take_ready(&mut self) -> Option<(u64, Segment)> {
        if let Some(segment) = self.termination.take() {
            return Some(self.stamp(segment));
        }
        if self.closed {
            return None;
        }
        let mut segment = if self.front_sendable() {
            self.pending.pop_front()?
        } else if self.pending_timeout.is_some() || self.pending_allowance.is_some() {
            Segment::new(SegmentKind::Control)
        } else {
            return None;
        };
        if segment.payload.is_some()
            && let Some(window) = self.remote_window.as_mut()
        {
            *window = window.saturating_sub(1);
        }
        if let Some(timeout) = self.pending_timeout.take() {
            segment.timeout = Some(timeout);
        }
        if let Some(granted) = self.pending_allowance.take() {
            segment.allowance = Some(
                segment
                    .allowance
                    .map_or(granted, |carried| carried.saturating_add(granted)),
            );
        }
        Some(self.stamp(segment))
    }

    fn front_sendable(&self) -> bool {
        self.pending
            .front()
            .is_some_and(|segment| segment.payload.is_none() || self.remote_window != Some(0))
    }

    fn stamp(&mut self, segment: Segment) -> (u64, Segment) {
        let sequence_number = self.next_sequence;
        self.next_sequence += 1;
        (sequence_number, segment)
    }
}
