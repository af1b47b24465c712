//! # Front：客户端一侧
//!
//! ## 核心意图（Why）
//! - 为调用方提供唯一的发起入口 [`Front::operate`]，并把 Back→Front 票据路由到对应操作；
//! - 发起时同步完成所有可能失败的检查（方法表、链路绑定），之后的失败一律体现为终态。

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tracing::debug;

use crate::{
    config::EndConfig,
    customer::Subscription,
    error::{LinkError, TicketError},
    link::{ForeLink, LinkSlot, RearLink},
    operation::{FrontOutbound, Operation, OperationHandle, OperationSetup},
    runtime::WorkPool,
    ticket::{BackToFrontTicket, OperationId, Payload, Segment, SegmentKind},
};

use super::{OperationStats, OperationTable};

/// 客户端一侧的端。克隆共享同一张操作表。
#[derive(Clone)]
pub struct Front {
    inner: Arc<FrontInner>,
}

struct FrontInner {
    config: EndConfig,
    pool: Arc<dyn WorkPool>,
    table: Arc<OperationTable>,
    rear: Arc<LinkSlot<dyn RearLink>>,
}

impl Front {
    /// 以校验过的配置和工作池构造。
    pub fn new(config: EndConfig, pool: Arc<dyn WorkPool>) -> Result<Self, TicketError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(FrontInner {
                config,
                table: OperationTable::new(Arc::clone(&pool)),
                pool,
                rear: Arc::new(LinkSlot::empty()),
            }),
        })
    }

    /// 绑定下游链路；已绑定时替换，正在进行的操作从下一张票据起使用新链路。
    pub fn join_rear_link(&self, link: Arc<dyn RearLink>) {
        self.inner.rear.join(link);
    }

    /// 发起一个操作。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：把“方法名 + 首个请求值 + 是否已完成”合并为一张 `COMMENCEMENT`/`ENTIRE` 票据；
    /// - **契约 (What)**：
    ///   - `timeout` 缺省取配置的默认值，并截断到配置上限；
    ///   - 配置了方法表且 `name` 不在其中时返回 [`TicketError::NoSuchMethod`]；
    ///   - 尚未绑定下游链路时返回 [`TicketError::NotLinked`]；
    ///   - 返回后发起票据已排队，链路调用在工作池中异步进行；
    /// - **风险 (Trade-offs)**：`Subscription::Full` 的 `Ingestor` 在工作池中被调用，
    ///   它的失败会以 `SERVICED_FAILURE` 终止操作而不是在这里返回错误。
    pub fn operate(
        &self,
        name: &str,
        payload: Option<Payload>,
        complete: bool,
        timeout: Option<Duration>,
        subscription: Subscription,
        trace_id: Option<&str>,
    ) -> Result<OperationHandle, TicketError> {
        let inner = &self.inner;
        if !inner.config.permits_method(name) {
            return Err(TicketError::NoSuchMethod {
                name: name.to_owned(),
            });
        }
        if !inner.rear.is_joined() {
            return Err(TicketError::NotLinked);
        }

        let id = OperationId::generate();
        let timeout = timeout
            .unwrap_or_else(|| inner.config.default_timeout())
            .min(inner.config.maximum_timeout());
        let trace_id: Option<Arc<str>> = trace_id.map(Arc::from);

        let mut commencement = Segment::new(SegmentKind::Commencement { complete });
        commencement.payload = payload;
        commencement.timeout = Some(timeout);

        let outbound = FrontOutbound {
            link: Arc::clone(&inner.rear),
            name: Arc::from(name),
            subscription: subscription.kind(),
            trace_id: trace_id.clone(),
        };
        let setup = OperationSetup {
            id,
            trace_id,
            timeout,
            maximum_timeout: inner.config.maximum_timeout(),
            local_allowance: inner.config.initial_allowance,
            pool: Arc::clone(&inner.pool),
            table: Arc::downgrade(&inner.table),
        };
        let operation = Operation::front(setup, outbound, &subscription, commencement);
        inner.table.insert(Arc::clone(&operation));
        operation.start();
        debug!(operation_id = %id, method = name, ?subscription, "operation commenced");
        Ok(OperationHandle::new(operation))
    }

    pub(crate) fn pool(&self) -> &dyn WorkPool {
        self.inner.pool.as_ref()
    }

    /// 已结束操作按终态的直方图。
    pub fn operation_stats(&self) -> OperationStats {
        self.inner.table.stats()
    }

    /// 仍在表中的操作数量。
    pub fn operation_count(&self) -> usize {
        self.inner.table.len()
    }

    /// 登记一个在操作表变空时执行一次的动作；表已为空时立即派发。
    pub fn add_idle_action(&self, action: impl FnOnce() + Send + 'static) {
        self.inner.table.add_idle_action(Box::new(action));
    }

    /// 不持有所有权的链路适配器。
    pub fn downgrade(&self) -> WeakFront {
        WeakFront {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl ForeLink for Front {
    fn accept_back_to_front_ticket(&self, ticket: BackToFrontTicket) -> Result<(), LinkError> {
        match self.inner.table.get(ticket.operation_id) {
            Some(operation) => operation.handle_ticket(ticket),
            None => debug!(
                operation_id = %ticket.operation_id,
                sequence_number = ticket.sequence_number,
                "dropping ticket for unknown operation"
            ),
        }
        Ok(())
    }
}

impl core::fmt::Debug for Front {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Front")
            .field("operations", &self.inner.table.len())
            .field("linked", &self.inner.rear.is_joined())
            .finish()
    }
}

/// [`Front`] 的弱引用，供 Back 侧作为上游链路持有。
#[derive(Clone, Debug)]
pub struct WeakFront {
    inner: Weak<FrontInner>,
}

impl ForeLink for WeakFront {
    fn accept_back_to_front_ticket(&self, ticket: BackToFrontTicket) -> Result<(), LinkError> {
        let inner = self.inner.upgrade().ok_or(LinkError::Closed)?;
        Front { inner }.accept_back_to_front_ticket(ticket)
    }
}
