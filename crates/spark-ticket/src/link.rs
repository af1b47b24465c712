//! # link：端与端之间的票据通道
//!
//! ## 契约声明（What）
//! - [`RearLink`]：Front 的下游，接收 Front→Back 票据；[`crate::Back`] 实现该接口；
//! - [`ForeLink`]：Back 的上游，接收 Back→Front 票据；[`crate::Front`] 实现该接口；
//! - 实现必须保证同一操作、同一方向上的票据按调用顺序投递；跨操作无顺序要求。
//!
//! ## 错误处理（Trade-offs）
//! - 返回 `Err` 即视为该票据未能送达，发送方操作立即以 `TRANSMISSION_FAILURE` 终止且不重试。
//!   接受方对票据内容的处理失败**不得**通过返回值反映，而应体现为对端的终态。

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    ends::{Back, Front},
    error::LinkError,
    ticket::{BackToFrontTicket, FrontToBackTicket},
};

/// 接收 Front→Back 票据的一端。
pub trait RearLink: Send + Sync + 'static {
    fn accept_front_to_back_ticket(&self, ticket: FrontToBackTicket) -> Result<(), LinkError>;
}

/// 接收 Back→Front 票据的一端。
pub trait ForeLink: Send + Sync + 'static {
    fn accept_back_to_front_ticket(&self, ticket: BackToFrontTicket) -> Result<(), LinkError>;
}

/// 在同一进程内把一对端直接连接起来。
///
/// # 教案式说明
/// - **意图 (Why)**：测试与进程内部署无需任何传输层即可驱动完整协议；
/// - **逻辑 (How)**：双方互相持有对方的弱引用适配器，避免 `Front ↔ Back` 引用环；
///   任意一端被释放后，另一端的发送返回 [`LinkError::Closed`]；
/// - **契约 (What)**：可重复调用，后一次连接覆盖前一次。
pub fn connect(front: &Front, back: &Back) {
    front.join_rear_link(Arc::new(back.downgrade()));
    back.join_fore_link(Arc::new(front.downgrade()));
}

/// 可替换的链路槽位；发送方每次投递时读取当前链路。
pub(crate) struct LinkSlot<L: ?Sized> {
    current: RwLock<Option<Arc<L>>>,
}

impl<L: ?Sized> LinkSlot<L> {
    pub(crate) fn empty() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    pub(crate) fn join(&self, link: Arc<L>) {
        *self.current.write() = Some(link);
    }

    pub(crate) fn get(&self) -> Option<Arc<L>> {
        self.current.read().clone()
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.current.read().is_some()
    }
}
