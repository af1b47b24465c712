//! # operator：客户代码手中的操作句柄
//!
//! - [`Operator`] 是本端发送方向的入口：推进值序列、调整本地额度与超时、主动中止；
//! - [`OperationHandle`] 是 `Front::operate` 的返回值，在 `Operator` 之上补充取消语义。

use std::{sync::Arc, time::Duration};

use crate::{
    context::OperationContext,
    customer::Consumer,
    error::{BoxError, TicketError},
    outcome::Outcome,
    ticket::{OperationId, Payload},
};

use super::Operation;

/// 操作的发送端。
///
/// # 教案式说明
/// - **意图 (Why)**：Front 用它推进请求流，Back 的服务入口用它推进响应流；
/// - **契约 (What)**：
///   - 完成只能宣告一次，第二次返回 [`TicketError::CompletionAlreadyEmitted`]；
///   - 操作终止后，推进请求被静默丢弃，客户代码应通过 [`OperationContext::is_active`] 感知；
/// - **风险 (Trade-offs)**：`Operator` 持有操作的强引用，业务代码长期保存它会推迟内存回收，
///   但不会推迟操作出表。
#[derive(Clone)]
pub struct Operator {
    operation: Arc<Operation>,
}

impl Operator {
    pub(crate) fn new(operation: Arc<Operation>) -> Self {
        Self { operation }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation.id()
    }

    pub fn context(&self) -> &OperationContext {
        self.operation.context()
    }

    /// 发送一个值和/或宣告本方向完成。
    pub fn advance(&self, payload: Option<Payload>, complete: bool) -> Result<(), TicketError> {
        self.operation.advance(payload, complete)
    }

    /// 授予对端额外的发送额度，同时放宽本地投递额度。本地不限额时无效。
    pub fn add_local_allowance(&self, allowance: u64) {
        self.operation.add_local_allowance(allowance);
    }

    /// 把本地额度设为给定值；只有增加的部分会授予对端。
    pub fn set_local_allowance(&self, allowance: u64) {
        self.operation.set_local_allowance(allowance);
    }

    /// 以操作创建时刻为起点重设超时。Front 会把新超时捎带给对端。
    pub fn change_timeout(&self, timeout: Duration) {
        self.operation.change_timeout(timeout);
    }

    /// 以给定异常终态中止操作并通知对端。
    pub fn abort(&self, outcome: Outcome) {
        self.operation.abort(outcome);
    }
}

impl core::fmt::Debug for Operator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Operator")
            .field("operation_id", &self.operation.id())
            .finish()
    }
}

/// 把本端发送方向当作消费者使用，例如回显服务直接把输入转发为输出。
impl Consumer for Operator {
    fn consume(&self, value: Payload) -> Result<(), BoxError> {
        self.advance(Some(value), false).map_err(Into::into)
    }

    fn terminate(&self) -> Result<(), BoxError> {
        self.advance(None, true).map_err(Into::into)
    }

    fn consume_and_terminate(&self, value: Payload) -> Result<(), BoxError> {
        self.advance(Some(value), true).map_err(Into::into)
    }
}

/// `Front::operate` 返回的操作句柄。
#[derive(Clone, Debug)]
pub struct OperationHandle {
    operator: Operator,
}

impl OperationHandle {
    pub(crate) fn new(operation: Arc<Operation>) -> Self {
        Self {
            operator: Operator::new(operation),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operator.operation_id()
    }

    pub fn context(&self) -> &OperationContext {
        self.operator.context()
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// 取消操作：终态同步写入，通知对端与终止回调异步派发。幂等。
    pub fn cancel(&self) {
        self.operator.operation.cancel();
    }

    pub fn abort(&self, outcome: Outcome) {
        self.operator.abort(outcome);
    }

    pub fn into_operator(self) -> Operator {
        self.operator
    }
}
