//! # stream：值序列与操作之间的适配
//!
//! - [`pump`] / [`forward`]：把同步迭代器逐个推进到 [`Operator`]，每个值之前检查操作是否仍在进行，
//!   操作一旦终止立即停止拉取迭代器；
//! - [`ChannelConsumer`]：把消费者回调桥接到 Tokio 无界通道，供异步代码按顺序读取。

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::{
    context::OperationContext,
    customer::Consumer,
    error::{BoxError, TicketError},
    operation::Operator,
    outcome::Outcome,
    runtime::WorkPool,
    ticket::Payload,
};

/// 在工作池中把迭代器的全部值推进到 `operator`，最后宣告完成。
pub fn pump<I>(operator: Operator, pool: &dyn WorkPool, items: I)
where
    I: IntoIterator<Item = Payload> + Send + 'static,
{
    pool.submit(Box::new(move || {
        if let Err(error) = forward(&operator, items) {
            debug!(operation_id = %operator.operation_id(), %error, "stream pump stopped");
        }
    }));
}

/// 在当前线程上推进迭代器；操作终止时提前返回 `Ok(())`。
pub fn forward<I>(operator: &Operator, items: I) -> Result<(), TicketError>
where
    I: IntoIterator<Item = Payload>,
{
    for item in items {
        if !operator.context().is_active() {
            return Ok(());
        }
        operator.advance(Some(item), false)?;
    }
    if operator.context().is_active() {
        operator.advance(None, true)?;
    }
    Ok(())
}

/// [`ChannelConsumer`] 送出的事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    /// 一个值。
    Value(Payload),
    /// 值序列正常结束。
    End,
    /// 操作终态，仅在调用过 [`ChannelConsumer::watch`] 后出现。
    Outcome(Outcome),
}

/// 把 `consume`/`terminate` 转发到无界通道的消费者。
#[derive(Clone, Debug)]
pub struct ChannelConsumer {
    sender: UnboundedSender<StreamItem>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, UnboundedReceiver<StreamItem>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// 操作终止时向通道追加 [`StreamItem::Outcome`]；若已终止则立即追加。
    pub fn watch(&self, context: &OperationContext) {
        let sender = self.sender.clone();
        let late = context.add_termination_callback(move |outcome| {
            let _ = sender.send(StreamItem::Outcome(outcome));
        });
        if let Some(outcome) = late {
            let _ = self.sender.send(StreamItem::Outcome(outcome));
        }
    }

    /// 作为 `Subscription::Full` 所需的 `Ingestor` 使用。
    pub fn into_consumer(self) -> Arc<dyn Consumer> {
        Arc::new(self)
    }
}

impl Consumer for ChannelConsumer {
    fn consume(&self, value: Payload) -> Result<(), BoxError> {
        self.sender
            .send(StreamItem::Value(value))
            .map_err(|_| "stream receiver dropped".into())
    }

    fn terminate(&self) -> Result<(), BoxError> {
        self.sender
            .send(StreamItem::End)
            .map_err(|_| "stream receiver dropped".into())
    }
}
