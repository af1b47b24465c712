//! # Back：服务端一侧
//!
//! ## 核心意图（Why）
//! - 收到未知操作的发起票据时创建操作，并在工作池中把它交给 [`Servicer`]；
//! - 其余票据按操作 ID 路由；未知操作的非发起票据直接丢弃（操作可能已经出表）。
//!
//! ## 行为契约（What）
//! - 链路返回值只反映“是否收下”：票据内容上的任何问题都体现为对端观测到的终态；
//! - 无法归属任何操作的畸形发起票据，以序号 0 的 `RECEPTION_FAILURE` 回复给 Front。

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::{
    config::EndConfig,
    customer::Servicer,
    error::{LinkError, TicketError},
    link::{ForeLink, LinkSlot, RearLink},
    operation::{BackOutbound, Operation, OperationSetup},
    runtime::WorkPool,
    ticket::{BackToFrontKind, BackToFrontTicket, FrontToBackKind, FrontToBackTicket, OperationId},
};

use super::{OperationStats, OperationTable};

/// 服务端一侧的端。克隆共享同一张操作表。
#[derive(Clone)]
pub struct Back {
    inner: Arc<BackInner>,
}

struct BackInner {
    config: EndConfig,
    pool: Arc<dyn WorkPool>,
    table: Arc<OperationTable>,
    fore: Arc<LinkSlot<dyn ForeLink>>,
    servicer: Arc<dyn Servicer>,
}

impl Back {
    pub fn new(
        config: EndConfig,
        pool: Arc<dyn WorkPool>,
        servicer: Arc<dyn Servicer>,
    ) -> Result<Self, TicketError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BackInner {
                config,
                table: OperationTable::new(Arc::clone(&pool)),
                pool,
                fore: Arc::new(LinkSlot::empty()),
                servicer,
            }),
        })
    }

    /// 绑定上游链路；未绑定期间产生的出站票据会以 `TRANSMISSION_FAILURE` 终止对应操作。
    pub fn join_fore_link(&self, link: Arc<dyn ForeLink>) {
        self.inner.fore.join(link);
    }

    pub fn operation_stats(&self) -> OperationStats {
        self.inner.table.stats()
    }

    pub fn operation_count(&self) -> usize {
        self.inner.table.len()
    }

    pub fn add_idle_action(&self, action: impl FnOnce() + Send + 'static) {
        self.inner.table.add_idle_action(Box::new(action));
    }

    pub fn downgrade(&self) -> WeakBack {
        WeakBack {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn commence(&self, ticket: FrontToBackTicket) {
        let inner = &self.inner;
        let id = ticket.operation_id;
        if let Err(error) = ticket.validate() {
            warn!(operation_id = %id, %error, "refusing malformed commencement");
            self.refuse(id, error.reason());
            return;
        }
        let (Some(name), Some(subscription)) = (ticket.name.clone(), ticket.subscription) else {
            self.refuse(id, "commencement without method name or subscription");
            return;
        };
        let timeout = ticket
            .timeout
            .unwrap_or_else(|| inner.config.default_timeout())
            .min(inner.config.maximum_timeout());

        let (operation, created) = inner.table.get_or_create(id, || {
            let setup = OperationSetup {
                id,
                trace_id: ticket.trace_id.clone(),
                timeout,
                maximum_timeout: inner.config.maximum_timeout(),
                local_allowance: inner.config.initial_allowance,
                pool: Arc::clone(&inner.pool),
                table: Arc::downgrade(&inner.table),
            };
            let outbound = BackOutbound {
                link: Arc::clone(&inner.fore),
            };
            Operation::back(
                setup,
                outbound,
                Arc::clone(&inner.servicer),
                Arc::clone(&name),
                subscription,
            )
        });
        if created {
            debug!(operation_id = %id, method = %name, ?subscription, "operation accepted");
            operation.start();
        }
        operation.handle_ticket(ticket);
    }

    fn refuse(&self, id: OperationId, reason: &str) {
        let Some(link) = self.inner.fore.get() else {
            return;
        };
        let reply =
            BackToFrontTicket::new(id, 0, BackToFrontKind::ReceptionFailure).with_details(reason);
        if let Err(error) = link.accept_back_to_front_ticket(reply) {
            debug!(operation_id = %id, %error, "refusal could not be delivered");
        }
    }
}

impl RearLink for Back {
    fn accept_front_to_back_ticket(&self, ticket: FrontToBackTicket) -> Result<(), LinkError> {
        if let Some(operation) = self.inner.table.get(ticket.operation_id) {
            operation.handle_ticket(ticket);
            return Ok(());
        }
        match ticket.kind {
            FrontToBackKind::Commencement | FrontToBackKind::Entire => self.commence(ticket),
            _ => debug!(
                operation_id = %ticket.operation_id,
                sequence_number = ticket.sequence_number,
                kind = ?ticket.kind,
                "dropping ticket for unknown operation"
            ),
        }
        Ok(())
    }
}

impl core::fmt::Debug for Back {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Back")
            .field("operations", &self.inner.table.len())
            .field("linked", &self.inner.fore.is_joined())
            .finish()
    }
}

/// [`Back`] 的弱引用，供 Front 侧作为下游链路持有。
#[derive(Clone, Debug)]
pub struct WeakBack {
    inner: Weak<BackInner>,
}

impl RearLink for WeakBack {
    fn accept_front_to_back_ticket(&self, ticket: FrontToBackTicket) -> Result<(), LinkError> {
        let inner = self.inner.upgrade().ok_or(LinkError::Closed)?;
        Back { inner }.accept_front_to_back_ticket(ticket)
    }
}
