//! # ticket：两种方向的票据模型
//!
//! ## 核心意图（Why）
//! - 票据是协议的最小传输单元：Front→Back 方向承载调用发起、请求流与控制信号，Back→Front
//!   方向承载响应流与控制信号；两种形状在字段上并不对称，因此拆分为两个结构体；
//! - 票据不可变、短生命周期：由发送方构造，交给链路（Link）后即被丢弃。
//!
//! ## 行为契约（What）
//! - 同一操作同一方向上的序号从 0 开始、严格连续递增；Front→Back 的 0 号保留给
//!   `COMMENCEMENT`/`ENTIRE`；
//! - `validate()` 校验“种类 ↔ 字段存在性”的对应关系，违反时返回 [`MalformedTicketError`]；
//! - `CONTROL` 票据只携带超时与/或流控额度，在没有其他票据可捎带时单独发出；
//! - 终止类票据可附带一段可读的失败说明（`details`），对端将其记录为上下文的失败原因。
//!
//! ## 风险提示（Trade-offs）
//! - 序号只用于完整性校验而非重排：链路必须保证单方向有序投递，乱序会被视为接收失败。

use core::{fmt, time::Duration};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::MalformedTicketError, outcome::Outcome};

/// 不透明负载。序列化/反序列化由调用方在协议之外完成。
pub type Payload = Bytes;

/// 操作标识，在两个方向上保持稳定且全局唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// 生成新的随机标识（UUID v4）。
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// 由已有 UUID 构造，通常用于链路层反序列化后重建。
    pub const fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// 读取底层 UUID。
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// 线上订阅级别：Front 告知 Back 自己对回程票据的兴趣程度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionKind {
    /// 需要全部回程负载。
    Full,
    /// 只关心终态。
    TerminationOnly,
    /// 不再关心任何回程信息。
    None,
}

/// Front→Back 票据种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrontToBackKind {
    Commencement,
    Continuation,
    Completion,
    Entire,
    Control,
    Cancellation,
    Expiration,
    ServicerFailure,
    ServicedFailure,
    ReceptionFailure,
    TransmissionFailure,
}

/// Back→Front 票据种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackToFrontKind {
    Continuation,
    Completion,
    Control,
    Cancellation,
    Expiration,
    ServicerFailure,
    ServicedFailure,
    ReceptionFailure,
    TransmissionFailure,
}

macro_rules! termination_mapping {
    ($kind:ident) => {
        impl $kind {
            /// 终止类票据对应的终态；非终止类返回 `None`。
            pub const fn termination_outcome(self) -> Option<Outcome> {
                match self {
                    $kind::Cancellation => Some(Outcome::Cancelled),
                    $kind::Expiration => Some(Outcome::Expired),
                    $kind::ServicerFailure => Some(Outcome::ServicerFailure),
                    $kind::ServicedFailure => Some(Outcome::ServicedFailure),
                    $kind::ReceptionFailure => Some(Outcome::ReceptionFailure),
                    $kind::TransmissionFailure => Some(Outcome::TransmissionFailure),
                    _ => None,
                }
            }

            /// 将异常终态映射为通知对端的票据种类；`Completed` 没有对应的终止票据。
            pub const fn for_termination(outcome: Outcome) -> Option<Self> {
                match outcome {
                    Outcome::Completed => None,
                    Outcome::Cancelled => Some($kind::Cancellation),
                    Outcome::Expired => Some($kind::Expiration),
                    Outcome::ServicerFailure => Some($kind::ServicerFailure),
                    Outcome::ServicedFailure => Some($kind::ServicedFailure),
                    Outcome::ReceptionFailure => Some($kind::ReceptionFailure),
                    Outcome::TransmissionFailure => Some($kind::TransmissionFailure),
                }
            }
        }
    };
}

termination_mapping!(FrontToBackKind);
termination_mapping!(BackToFrontKind);

/// Front 发往 Back 的票据。
///
/// # 教案式说明
/// - **意图 (Why)**：承载调用发起（方法名、订阅级别、追踪 ID）、请求负载与控制信号；
/// - **契约 (What)**：
///   - `name`/`subscription` 仅出现在 `COMMENCEMENT`/`ENTIRE`；
///   - `payload` 在 `CONTINUATION` 上必填，在终止类与 `CONTROL` 上必须缺省；
///   - `timeout`/`allowance` 可捎带在任意非终止票据上；
///   - `details` 只出现在终止类票据上；
/// - **风险 (Trade-offs)**：字段以 `Option` 平铺而非按种类拆分枚举，便于链路层直接序列化，
///   代价是必须显式调用 [`validate`](Self::validate)。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontToBackTicket {
    pub operation_id: OperationId,
    pub sequence_number: u64,
    pub kind: FrontToBackKind,
    pub name: Option<Arc<str>>,
    pub subscription: Option<SubscriptionKind>,
    pub trace_id: Option<Arc<str>>,
    pub payload: Option<Payload>,
    pub timeout: Option<Duration>,
    pub allowance: Option<u64>,
    pub details: Option<Arc<str>>,
}

impl FrontToBackTicket {
    /// 构造只含必填字段的票据，其余字段通过 `with_*` 补充。
    pub fn new(operation_id: OperationId, sequence_number: u64, kind: FrontToBackKind) -> Self {
        Self {
            operation_id,
            sequence_number,
            kind,
            name: None,
            subscription: None,
            trace_id: None,
            payload: None,
            timeout: None,
            allowance: None,
            details: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionKind) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<Arc<str>>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_allowance(mut self, allowance: u64) -> Self {
        self.allowance = Some(allowance);
        self
    }

    pub fn with_details(mut self, details: impl Into<Arc<str>>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// 校验种类与字段的一致性。
    pub fn validate(&self) -> Result<(), MalformedTicketError> {
        let opening = matches!(
            self.kind,
            FrontToBackKind::Commencement | FrontToBackKind::Entire
        );
        if opening && self.sequence_number != 0 {
            return Err(self.malformed("commencement must carry sequence number 0"));
        }
        if !opening && self.sequence_number == 0 {
            return Err(self.malformed("sequence number 0 is reserved for commencement"));
        }
        if opening {
            if self.name.is_none() {
                return Err(self.malformed("commencement without method name"));
            }
            if self.subscription.is_none() {
                return Err(self.malformed("commencement without subscription"));
            }
        } else if self.name.is_some() || self.subscription.is_some() {
            return Err(self.malformed("name or subscription outside commencement"));
        }
        check_body(
            self.kind == FrontToBackKind::Continuation,
            self.kind == FrontToBackKind::Control,
            self.kind.termination_outcome().is_some(),
            self.payload.is_some(),
            self.timeout.is_some(),
            self.allowance.is_some(),
            self.details.is_some(),
        )
        .map_err(|reason| self.malformed(reason))
    }

    fn malformed(&self, reason: &'static str) -> MalformedTicketError {
        MalformedTicketError::new(self.operation_id, self.sequence_number, reason)
    }
}

/// Back 发往 Front 的票据。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackToFrontTicket {
    pub operation_id: OperationId,
    pub sequence_number: u64,
    pub kind: BackToFrontKind,
    pub payload: Option<Payload>,
    pub allowance: Option<u64>,
    pub details: Option<Arc<str>>,
}

impl BackToFrontTicket {
    pub fn new(operation_id: OperationId, sequence_number: u64, kind: BackToFrontKind) -> Self {
        Self {
            operation_id,
            sequence_number,
            kind,
            payload: None,
            allowance: None,
            details: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_allowance(mut self, allowance: u64) -> Self {
        self.allowance = Some(allowance);
        self
    }

    pub fn with_details(mut self, details: impl Into<Arc<str>>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// 校验种类与字段的一致性。
    pub fn validate(&self) -> Result<(), MalformedTicketError> {
        check_body(
            self.kind == BackToFrontKind::Continuation,
            self.kind == BackToFrontKind::Control,
            self.kind.termination_outcome().is_some(),
            self.payload.is_some(),
            false,
            self.allowance.is_some(),
            self.details.is_some(),
        )
        .map_err(|reason| {
            MalformedTicketError::new(self.operation_id, self.sequence_number, reason)
        })
    }
}

fn check_body(
    continuation: bool,
    control: bool,
    termination: bool,
    payload: bool,
    timeout: bool,
    allowance: bool,
    details: bool,
) -> Result<(), &'static str> {
    if continuation && !payload {
        return Err("continuation without payload");
    }
    if control && payload {
        return Err("control ticket with payload");
    }
    if control && !timeout && !allowance {
        return Err("control ticket carries neither timeout nor allowance");
    }
    if termination && (payload || timeout || allowance) {
        return Err("termination ticket with payload or flow fields");
    }
    if details && !termination {
        return Err("failure details outside a termination ticket");
    }
    Ok(())
}

/// 与方向无关的票据内核，操作状态机只处理这一种形状。
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Segment {
    pub(crate) kind: SegmentKind,
    pub(crate) payload: Option<Payload>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) allowance: Option<u64>,
    pub(crate) details: Option<Arc<str>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    Commencement { complete: bool },
    Continuation,
    Completion,
    Control,
    Termination(Outcome),
}

impl Segment {
    pub(crate) fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            payload: None,
            timeout: None,
            allowance: None,
            details: None,
        }
    }

    /// 该票据是否宣告本方向流结束。
    pub(crate) fn completes_stream(&self) -> bool {
        matches!(
            self.kind,
            SegmentKind::Commencement { complete: true } | SegmentKind::Completion
        )
    }
}

/// 入站票据的统一视图，供操作状态机以同一路径处理两个方向。
pub(crate) trait InboundTicket {
    fn operation_id(&self) -> OperationId;
    fn sequence_number(&self) -> u64;
    fn check(&self) -> Result<(), MalformedTicketError>;
    fn into_segment(self) -> Segment;
}

impl InboundTicket for FrontToBackTicket {
    fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    fn check(&self) -> Result<(), MalformedTicketError> {
        self.validate()
    }

    fn into_segment(self) -> Segment {
        let kind = match self.kind {
            FrontToBackKind::Commencement => SegmentKind::Commencement { complete: false },
            FrontToBackKind::Entire => SegmentKind::Commencement { complete: true },
            FrontToBackKind::Continuation => SegmentKind::Continuation,
            FrontToBackKind::Completion => SegmentKind::Completion,
            FrontToBackKind::Control => SegmentKind::Control,
            other => match other.termination_outcome() {
                Some(outcome) => SegmentKind::Termination(outcome),
                None => SegmentKind::Control,
            },
        };
        Segment {
            kind,
            payload: self.payload,
            timeout: self.timeout,
            allowance: self.allowance,
            details: self.details,
        }
    }
}

impl InboundTicket for BackToFrontTicket {
    fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    fn check(&self) -> Result<(), MalformedTicketError> {
        self.validate()
    }

    fn into_segment(self) -> Segment {
        let kind = match self.kind {
            BackToFrontKind::Continuation => SegmentKind::Continuation,
            BackToFrontKind::Completion => SegmentKind::Completion,
            BackToFrontKind::Control => SegmentKind::Control,
            other => match other.termination_outcome() {
                Some(outcome) => SegmentKind::Termination(outcome),
                None => SegmentKind::Control,
            },
        };
        Segment {
            kind,
            payload: self.payload,
            timeout: None,
            allowance: self.allowance,
            details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commencement(id: OperationId) -> FrontToBackTicket {
        FrontToBackTicket::new(id, 0, FrontToBackKind::Commencement)
            .with_name("echo")
            .with_subscription(SubscriptionKind::Full)
    }

    #[test]
    fn commencement_requires_name_subscription_and_sequence_zero() {
        let id = OperationId::generate();
        assert!(commencement(id).validate().is_ok());

        let mut nameless = commencement(id);
        nameless.name = None;
        assert_eq!(
            nameless.validate().unwrap_err().reason(),
            "commencement without method name"
        );

        let mut late = commencement(id);
        late.sequence_number = 3;
        assert!(late.validate().is_err());

        let early_continuation = FrontToBackTicket::new(id, 0, FrontToBackKind::Continuation)
            .with_payload(Bytes::from_static(b"p"));
        assert!(early_continuation.validate().is_err());
    }

    #[test]
    fn body_rules_follow_kind() {
        let id = OperationId::generate();
        let empty_continuation = BackToFrontTicket::new(id, 0, BackToFrontKind::Continuation);
        assert!(empty_continuation.validate().is_err());

        let loaded_cancel = FrontToBackTicket::new(id, 2, FrontToBackKind::Cancellation)
            .with_payload(Bytes::from_static(b"x"));
        assert!(loaded_cancel.validate().is_err());

        let bare_control = BackToFrontTicket::new(id, 1, BackToFrontKind::Control);
        assert!(bare_control.validate().is_err());
        assert!(bare_control.with_allowance(4).validate().is_ok());

        let named_completion = FrontToBackTicket::new(id, 4, FrontToBackKind::Completion)
            .with_name("echo");
        assert!(named_completion.validate().is_err());

        let explained_failure = BackToFrontTicket::new(id, 3, BackToFrontKind::ServicerFailure)
            .with_details("boom");
        assert!(explained_failure.validate().is_ok());
        let explained_continuation = FrontToBackTicket::new(id, 5, FrontToBackKind::Continuation)
            .with_payload(Bytes::from_static(b"p"))
            .with_details("stray");
        assert_eq!(
            explained_continuation.validate().unwrap_err().reason(),
            "failure details outside a termination ticket"
        );
    }

    #[test]
    fn termination_kinds_map_to_abortive_outcomes() {
        for outcome in Outcome::ALL {
            let kind = FrontToBackKind::for_termination(outcome);
            assert_eq!(kind.is_none(), outcome == Outcome::Completed);
            if let Some(kind) = kind {
                assert_eq!(kind.termination_outcome(), Some(outcome));
            }
            if let Some(kind) = BackToFrontKind::for_termination(outcome) {
                assert_eq!(kind.termination_outcome(), Some(outcome));
            }
        }
    }

    #[test]
    fn entire_becomes_completing_commencement() {
        let id = OperationId::generate();
        let ticket = FrontToBackTicket::new(id, 0, FrontToBackKind::Entire)
            .with_name("echo")
            .with_subscription(SubscriptionKind::TerminationOnly)
            .with_timeout(Duration::from_secs(5));
        let segment = ticket.into_segment();
        assert!(segment.completes_stream());
        assert_eq!(segment.timeout, Some(Duration::from_secs(5)));
    }
}
