//! # reception：入站序号校验
//!
//! 链路保证单方向有序，因此这里只做连续性检查，不做重排：任何缺口或重复都被视为接收失败。

use thiserror::Error;

use crate::ticket::{Segment, SegmentKind};

/// 入站票据违反序号或流结束约束。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub(crate) enum ReceptionFault {
    #[error("expected ticket #{expected}, received #{actual}")]
    OutOfSequence { expected: u64, actual: u64 },
    #[error("ticket #{actual} carries data after the stream completed")]
    AfterCompletion { actual: u64 },
}

#[derive(Debug, Default)]
pub(crate) struct ReceptionManager {
    expected: u64,
    completed: bool,
}

impl ReceptionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn receive(
        &mut self,
        sequence_number: u64,
        segment: &Segment,
    ) -> Result<(), ReceptionFault> {
        if sequence_number != self.expected {
            return Err(ReceptionFault::OutOfSequence {
                expected: self.expected,
                actual: sequence_number,
            });
        }
        if self.completed
            && !matches!(
                segment.kind,
                SegmentKind::Control | SegmentKind::Termination(_)
            )
        {
            return Err(ReceptionFault::AfterCompletion {
                actual: sequence_number,
            });
        }
        self.expected += 1;
        if segment.completes_stream() {
            self.completed = true;
        }
        Ok(())
    }
}
