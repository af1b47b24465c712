//! # customer：客户代码接口
//!
//! ## 核心意图（Why）
//! - 协议状态机与应用代码之间只有三个接缝：消费负载的 [`Consumer`]、在 Front 按需创建消费者的
//!   [`Ingestor`]、在 Back 按方法名分派的 [`Servicer`]；
//! - 这些接口的实现都是“客户代码”：状态机只会在工作池中、且不持有任何内部锁时调用它们，
//!   返回的错误（或 panic）会被折叠为 `SERVICER_FAILURE`（Back）/`SERVICED_FAILURE`（Front）。
//!
//! ## 设计取舍（Trade-offs）
//! - `Consumer` 保留 `consume` / `terminate` / `consume_and_terminate` 三个入口，最后一个提供缺省实现，
//!   实现者只在需要“最后一个值与结束原子到达”语义时覆盖它。

use std::sync::Arc;

use crate::{
    context::OperationContext,
    error::{BoxError, ServiceError},
    operation::Operator,
    ticket::{Payload, SubscriptionKind},
};

/// 值序列的消费者。
///
/// # 契约说明（What）
/// - 同一操作上的调用严格串行、按票据序号顺序发生；
/// - `terminate`（或 `consume_and_terminate`）至多被调用一次，之后不会再有调用；
/// - 操作被中止时不会收到 `terminate`，实现者应通过
///   [`OperationContext::is_active`] 或终止回调感知。
pub trait Consumer: Send + Sync + 'static {
    /// 消费一个值。
    fn consume(&self, value: Payload) -> Result<(), BoxError>;

    /// 序列正常结束。
    fn terminate(&self) -> Result<(), BoxError>;

    /// 消费最后一个值并结束序列。
    fn consume_and_terminate(&self, value: Payload) -> Result<(), BoxError> {
        self.consume(value)?;
        self.terminate()
    }
}

/// Front 侧消费者工厂：操作开始后在工作池中被调用一次。
pub trait Ingestor: Send + Sync + 'static {
    fn consumer(&self, context: &OperationContext) -> Result<Arc<dyn Consumer>, BoxError>;
}

/// Back 侧服务入口。
///
/// # 教案式说明
/// - **意图 (Why)**：把“方法名 → 业务逻辑”的分派交给应用，状态机只关心返回的输入消费者；
/// - **契约 (What)**：
///   - `output` 是本操作的发送端，业务代码通过它推进响应流（`Operator` 同时实现了 [`Consumer`]，
///     恒等回显服务可以直接把它作为输入消费者返回）；
///   - 返回 [`ServiceError::NoSuchMethod`] 时，Front 观测到 `RECEPTION_FAILURE`；其他错误为 `SERVICER_FAILURE`；
/// - **风险 (Trade-offs)**：`service` 在工作池线程上执行，长时间阻塞会占用一个阻塞线程。
pub trait Servicer: Send + Sync + 'static {
    fn service(
        &self,
        name: &str,
        context: &OperationContext,
        output: Operator,
    ) -> Result<Arc<dyn Consumer>, ServiceError>;
}

/// Front 侧本地订阅。
#[derive(Clone)]
pub enum Subscription {
    /// 通过 `Ingestor` 接收每一个回程负载。
    Full(Arc<dyn Ingestor>),
    /// 只关心终态。
    TerminationOnly,
    /// 不关心任何回程信息。
    None,
}

impl Subscription {
    /// 线上表示。
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Subscription::Full(_) => SubscriptionKind::Full,
            Subscription::TerminationOnly => SubscriptionKind::TerminationOnly,
            Subscription::None => SubscriptionKind::None,
        }
    }

    /// 以任意 `Ingestor` 构造完整订阅。
    pub fn full(ingestor: impl Ingestor) -> Self {
        Subscription::Full(Arc::new(ingestor))
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Subscription").field(&self.kind()).finish()
    }
}

/// 总是返回同一个消费者的 `Ingestor`。
impl Ingestor for Arc<dyn Consumer> {
    fn consumer(&self, _context: &OperationContext) -> Result<Arc<dyn Consumer>, BoxError> {
        Ok(Arc::clone(self))
    }
}
