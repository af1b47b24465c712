//! # calls：Front 侧的调用便捷封装
//!
//! ## 意图（Why）
//! - 把“发起操作 → 推进请求 → 等待响应与终态”的样板封装为四个异步函数，对应四种方法基数；
//! - 终态 1:1 翻译为 [`CallError::Aborted`]，调用方无需接触终止回调。
//!
//! ## 契约（What）
//! - 返回的 future 或 [`ResponseStream`] 被丢弃时，若操作仍在进行则取消它；
//! - 调用方每取走一个响应值，便向对端归还一个额度，有限的初始额度因此只限制在途值的数量；
//! - 流式请求在工作池中经 [`stream::pump`] 推进，操作终止后停止拉取迭代器。

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    context::OperationContext,
    customer::Subscription,
    ends::Front,
    error::CallError,
    operation::OperationHandle,
    outcome::Outcome,
    stream::{self, ChannelConsumer, StreamItem},
    ticket::Payload,
};

/// 一元请求、一元响应。
pub async fn unary_unary(
    front: &Front,
    name: &str,
    request: Payload,
    timeout: Option<Duration>,
) -> Result<Payload, CallError> {
    let mut responses = commence(front, name, Some(request), true, timeout)?;
    responses.single().await
}

/// 一元请求、流式响应。
pub fn unary_stream(
    front: &Front,
    name: &str,
    request: Payload,
    timeout: Option<Duration>,
) -> Result<ResponseStream, CallError> {
    commence(front, name, Some(request), true, timeout)
}

/// 流式请求、一元响应。
pub async fn stream_unary<I>(
    front: &Front,
    name: &str,
    requests: I,
    timeout: Option<Duration>,
) -> Result<Payload, CallError>
where
    I: IntoIterator<Item = Payload> + Send + 'static,
{
    let mut responses = commence(front, name, None, false, timeout)?;
    stream::pump(responses.handle.operator().clone(), front.pool(), requests);
    responses.single().await
}

/// 流式请求、流式响应。
pub fn stream_stream<I>(
    front: &Front,
    name: &str,
    requests: I,
    timeout: Option<Duration>,
) -> Result<ResponseStream, CallError>
where
    I: IntoIterator<Item = Payload> + Send + 'static,
{
    let responses = commence(front, name, None, false, timeout)?;
    stream::pump(responses.handle.operator().clone(), front.pool(), requests);
    Ok(responses)
}

fn commence(
    front: &Front,
    name: &str,
    payload: Option<Payload>,
    complete: bool,
    timeout: Option<Duration>,
) -> Result<ResponseStream, CallError> {
    let (consumer, items) = ChannelConsumer::new();
    let handle = front.operate(
        name,
        payload,
        complete,
        timeout,
        Subscription::full(consumer.clone().into_consumer()),
        None,
    )?;
    consumer.watch(handle.context());
    Ok(ResponseStream {
        handle,
        items,
        finished: false,
    })
}

/// 流式响应的读取端。
///
/// # 教案式说明
/// - **契约 (What)**：[`next`](Self::next) 依次返回响应值；操作自然完成时返回 `None`，
///   异常终止时返回一次 `Some(Err(CallError::Aborted(outcome)))` 后返回 `None`；
/// - **逻辑 (How)**：每返回一个值都调用 `add_local_allowance(1)`；本地不限额时该调用无效；
/// - **风险 (Trade-offs)**：底层通道无界，消费过慢的调用方应通过
///   `OperationHandle::operator().set_local_allowance` 收紧额度。
#[derive(Debug)]
pub struct ResponseStream {
    handle: OperationHandle,
    items: UnboundedReceiver<StreamItem>,
    finished: bool,
}

impl ResponseStream {
    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    pub fn context(&self) -> &OperationContext {
        self.handle.context()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub async fn next(&mut self) -> Option<Result<Payload, CallError>> {
        while !self.finished {
            match self.items.recv().await {
                Some(StreamItem::Value(payload)) => {
                    self.handle.operator().add_local_allowance(1);
                    return Some(Ok(payload));
                }
                Some(StreamItem::End) => {}
                Some(StreamItem::Outcome(Outcome::Completed)) => self.finished = true,
                Some(StreamItem::Outcome(outcome)) => {
                    self.finished = true;
                    return Some(Err(CallError::Aborted(outcome)));
                }
                None => {
                    self.finished = true;
                    if let Some(outcome) = self.handle.context().outcome()
                        && outcome.is_abortive()
                    {
                        return Some(Err(CallError::Aborted(outcome)));
                    }
                }
            }
        }
        None
    }

    /// 读取全部响应值。
    pub async fn collect(mut self) -> Result<Vec<Payload>, CallError> {
        let mut values = Vec::new();
        while let Some(item) = self.next().await {
            values.push(item?);
        }
        Ok(values)
    }

    async fn single(&mut self) -> Result<Payload, CallError> {
        let mut response = None;
        while let Some(item) = self.next().await {
            let value = item?;
            response.get_or_insert(value);
        }
        response.ok_or(CallError::MissingResponse)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.handle.context().is_active() {
            self.handle.cancel();
        }
    }
}
