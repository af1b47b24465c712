//! # outbound：方向相关的票据成形
//!
//! 操作内部只处理与方向无关的 [`Segment`]；交给链路前由这里补齐方向特有字段（方法名、订阅级别、追踪 ID）。

use std::sync::Arc;

use crate::{
    error::LinkError,
    link::{ForeLink, LinkSlot, RearLink},
    ticket::{
        BackToFrontKind, BackToFrontTicket, FrontToBackKind, FrontToBackTicket, OperationId,
        Segment, SegmentKind, SubscriptionKind,
    },
};

/// 把分段交给链路。
pub(crate) trait Outbound: Send + Sync + 'static {
    fn transmit(
        &self,
        operation_id: OperationId,
        sequence_number: u64,
        segment: Segment,
    ) -> Result<(), LinkError>;
}

pub(crate) struct FrontOutbound {
    pub(crate) link: Arc<LinkSlot<dyn RearLink>>,
    pub(crate) name: Arc<str>,
    pub(crate) subscription: SubscriptionKind,
    pub(crate) trace_id: Option<Arc<str>>,
}

impl Outbound for FrontOutbound {
    fn transmit(
        &self,
        operation_id: OperationId,
        sequence_number: u64,
        segment: Segment,
    ) -> Result<(), LinkError> {
        let kind = match segment.kind {
            SegmentKind::Commencement { complete: false } => FrontToBackKind::Commencement,
            SegmentKind::Commencement { complete: true } => FrontToBackKind::Entire,
            SegmentKind::Continuation => FrontToBackKind::Continuation,
            SegmentKind::Completion => FrontToBackKind::Completion,
            SegmentKind::Control => FrontToBackKind::Control,
            SegmentKind::Termination(outcome) => FrontToBackKind::for_termination(outcome)
                .ok_or(LinkError::Rejected("completed is not a termination ticket".into()))?,
        };
        let mut ticket = FrontToBackTicket::new(operation_id, sequence_number, kind);
        if matches!(segment.kind, SegmentKind::Commencement { .. }) {
            ticket.name = Some(Arc::clone(&self.name));
            ticket.subscription = Some(self.subscription);
            ticket.trace_id = self.trace_id.clone();
        }
        ticket.payload = segment.payload;
        ticket.timeout = segment.timeout;
        ticket.allowance = segment.allowance;
        ticket.details = segment.details;

        let link = self.link.get().ok_or(LinkError::Closed)?;
        link.accept_front_to_back_ticket(ticket)
    }
}

pub(crate) struct BackOutbound {
    pub(crate) link: Arc<LinkSlot<dyn ForeLink>>,
}

impl Outbound for BackOutbound {
    fn transmit(
        &self,
        operation_id: OperationId,
        sequence_number: u64,
        segment: Segment,
    ) -> Result<(), LinkError> {
        let kind = match segment.kind {
            SegmentKind::Commencement { .. } => {
                return Err(LinkError::Rejected(
                    "commencement cannot travel back to front".into(),
                ));
            }
            SegmentKind::Continuation => BackToFrontKind::Continuation,
            SegmentKind::Completion => BackToFrontKind::Completion,
            SegmentKind::Control => BackToFrontKind::Control,
            SegmentKind::Termination(outcome) => BackToFrontKind::for_termination(outcome)
                .ok_or(LinkError::Rejected("completed is not a termination ticket".into()))?,
        };
        let mut ticket = BackToFrontTicket::new(operation_id, sequence_number, kind);
        ticket.payload = segment.payload;
        ticket.allowance = segment.allowance;
        ticket.details = segment.details;

        let link = self.link.get().ok_or(LinkError::Closed)?;
        link.accept_back_to_front_ticket(ticket)
    }
}
