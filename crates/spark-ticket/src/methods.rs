//! # methods：按方法名分派的服务实现
//!
//! ## 核心意图（Why）
//! - 大多数服务只需要“给一个请求值、返回一个响应值”或其流式变体；[`MethodServicer`] 把这四种基数
//!   （一元/流式请求 × 一元/流式响应）适配为底层的 [`Servicer`] + [`Consumer`] 接口；
//! - 基数在注册时以 [`MethodImplementation`] 的变体确定，分派时无需再做类型判断。
//!
//! ## 行为契约（What）
//! - 未注册的方法名返回 [`ServiceError::NoSuchMethod`]，Front 观测到 `RECEPTION_FAILURE`；
//! - 业务函数返回错误时操作以 `SERVICER_FAILURE` 终止；
//! - 流式请求以阻塞迭代器 [`PayloadIter`] 交给业务函数，操作终止（例如被取消）时迭代器立即结束；
//! - 业务函数每取走一个请求值就向 Front 归还一个额度，Back 配置的初始额度只限制尚未取走的请求数。
//!
//! ## 风险提示（Trade-offs）
//! - 流式请求的业务函数独占一个工作池线程直到返回，`TokioWorkPool` 下即一个阻塞线程。

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::{
    context::OperationContext,
    customer::{Consumer, Servicer},
    error::{BoxError, ServiceError},
    operation::Operator,
    outcome::Outcome,
    runtime::WorkPool,
    stream,
    ticket::Payload,
};

/// 阻塞式的值迭代器。
pub type PayloadIter = Box<dyn Iterator<Item = Payload> + Send + 'static>;

type UnaryBehavior<R> =
    Arc<dyn Fn(Payload, &OperationContext) -> Result<R, BoxError> + Send + Sync>;
type StreamBehavior<R> =
    Arc<dyn Fn(PayloadIter, &OperationContext) -> Result<R, BoxError> + Send + Sync>;

/// 一个方法的实现及其基数。
#[derive(Clone)]
pub enum MethodImplementation {
    UnaryUnary(UnaryBehavior<Payload>),
    UnaryStream(UnaryBehavior<PayloadIter>),
    StreamUnary(StreamBehavior<Payload>),
    StreamStream(StreamBehavior<PayloadIter>),
}

impl MethodImplementation {
    pub fn unary_unary<F>(behavior: F) -> Self
    where
        F: Fn(Payload, &OperationContext) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        MethodImplementation::UnaryUnary(Arc::new(behavior))
    }

    pub fn unary_stream<F>(behavior: F) -> Self
    where
        F: Fn(Payload, &OperationContext) -> Result<PayloadIter, BoxError> + Send + Sync + 'static,
    {
        MethodImplementation::UnaryStream(Arc::new(behavior))
    }

    pub fn stream_unary<F>(behavior: F) -> Self
    where
        F: Fn(PayloadIter, &OperationContext) -> Result<Payload, BoxError> + Send + Sync + 'static,
    {
        MethodImplementation::StreamUnary(Arc::new(behavior))
    }

    pub fn stream_stream<F>(behavior: F) -> Self
    where
        F: Fn(PayloadIter, &OperationContext) -> Result<PayloadIter, BoxError>
            + Send
            + Sync
            + 'static,
    {
        MethodImplementation::StreamStream(Arc::new(behavior))
    }

    fn cardinality(&self) -> &'static str {
        match self {
            MethodImplementation::UnaryUnary(_) => "unary-unary",
            MethodImplementation::UnaryStream(_) => "unary-stream",
            MethodImplementation::StreamUnary(_) => "stream-unary",
            MethodImplementation::StreamStream(_) => "stream-stream",
        }
    }
}

impl core::fmt::Debug for MethodImplementation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.cardinality())
    }
}

/// 方法表驱动的 [`Servicer`]。
///
/// # 教案式说明
/// - **意图 (Why)**：应用只注册业务函数，不必直接面对票据、额度与终止回调；
/// - **逻辑 (How)**：
///   - 一元请求：返回的消费者缓存请求值，在 `terminate` 时调用业务函数；
///   - 流式请求：立即在工作池中启动业务函数，请求值经无界通道流入；终止回调关闭通道；
///   - 流式响应：经 [`stream::forward`] 推进，每个值之前检查操作是否仍在进行；
/// - **契约 (What)**：`with_method` 对同名方法后注册者覆盖先注册者。
#[derive(Clone)]
pub struct MethodServicer {
    methods: HashMap<String, MethodImplementation>,
    pool: Arc<dyn WorkPool>,
}

impl MethodServicer {
    pub fn new(pool: Arc<dyn WorkPool>) -> Self {
        Self {
            methods: HashMap::new(),
            pool,
        }
    }

    pub fn with_method(
        mut self,
        name: impl Into<String>,
        implementation: MethodImplementation,
    ) -> Self {
        self.methods.insert(name.into(), implementation);
        self
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl core::fmt::Debug for MethodServicer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.methods.iter()).finish()
    }
}

impl Servicer for MethodServicer {
    fn service(
        &self,
        name: &str,
        context: &OperationContext,
        output: Operator,
    ) -> Result<Arc<dyn Consumer>, ServiceError> {
        let implementation = self
            .methods
            .get(name)
            .ok_or_else(|| ServiceError::NoSuchMethod(name.to_owned()))?;
        let consumer: Arc<dyn Consumer> = match implementation {
            MethodImplementation::UnaryUnary(behavior) => Arc::new(UnaryRequest {
                request: Mutex::new(None),
                respond: Responder::Unary(Arc::clone(behavior)),
                output,
            }),
            MethodImplementation::UnaryStream(behavior) => Arc::new(UnaryRequest {
                request: Mutex::new(None),
                respond: Responder::Stream(Arc::clone(behavior)),
                output,
            }),
            MethodImplementation::StreamUnary(behavior) => {
                let behavior = Arc::clone(behavior);
                self.spawn_streaming(context, output, move |requests, context, output| {
                    let response = behavior(requests, context)?;
                    output.advance(Some(response), true)?;
                    Ok(())
                })
            }
            MethodImplementation::StreamStream(behavior) => {
                let behavior = Arc::clone(behavior);
                self.spawn_streaming(context, output, move |requests, context, output| {
                    let responses = behavior(requests, context)?;
                    stream::forward(output, responses)?;
                    Ok(())
                })
            }
        };
        Ok(consumer)
    }
}

impl MethodServicer {
    /// 启动流式请求的业务函数，返回把请求值送入通道的消费者。
    fn spawn_streaming<F>(
        &self,
        context: &OperationContext,
        output: Operator,
        run: F,
    ) -> Arc<dyn Consumer>
    where
        F: FnOnce(PayloadIter, &OperationContext, &Operator) -> Result<(), BoxError>
            + Send
            + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sender = Arc::new(Mutex::new(Some(sender)));
        let closer = Arc::clone(&sender);
        if context
            .add_termination_callback(move |_| {
                closer.lock().take();
            })
            .is_some()
        {
            sender.lock().take();
        }

        let context = context.clone();
        self.pool.submit(Box::new(move || {
            let requests: PayloadIter = Box::new(ReceiverIter {
                receiver,
                credit: output.clone(),
            });
            if let Err(error) = run(requests, &context, &output) {
                fail(&output, error);
            }
        }));
        Arc::new(RequestStream { sender })
    }
}

fn fail(output: &Operator, error: BoxError) {
    if output.context().is_active() {
        warn!(operation_id = %output.operation_id(), %error, "method implementation failed");
        output.context().fail(error);
        output.abort(Outcome::ServicerFailure);
    }
}

enum Responder {
    Unary(UnaryBehavior<Payload>),
    Stream(UnaryBehavior<PayloadIter>),
}

/// 一元请求：缓存唯一的请求值，请求流结束时调用业务函数。
struct UnaryRequest {
    request: Mutex<Option<Payload>>,
    respond: Responder,
    output: Operator,
}

impl Consumer for UnaryRequest {
    fn consume(&self, value: Payload) -> Result<(), BoxError> {
        {
            let mut request = self.request.lock();
            if request.is_some() {
                return Err("unary method received more than one request".into());
            }
            *request = Some(value);
        }
        self.output.add_local_allowance(1);
        Ok(())
    }

    fn terminate(&self) -> Result<(), BoxError> {
        let request = self
            .request
            .lock()
            .take()
            .ok_or("unary method completed without a request")?;
        let context = self.output.context();
        match &self.respond {
            Responder::Unary(behavior) => {
                let response = behavior(request, context)?;
                self.output.advance(Some(response), true)?;
            }
            Responder::Stream(behavior) => {
                let responses = behavior(request, context)?;
                stream::forward(&self.output, responses)?;
            }
        }
        Ok(())
    }
}

/// 流式请求：把值送入通道；通道关闭（操作已终止）后静默丢弃。
struct RequestStream {
    sender: Arc<Mutex<Option<UnboundedSender<Payload>>>>,
}

impl Consumer for RequestStream {
    fn consume(&self, value: Payload) -> Result<(), BoxError> {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(value);
        }
        Ok(())
    }

    fn terminate(&self) -> Result<(), BoxError> {
        self.sender.lock().take();
        Ok(())
    }
}

/// 请求流的读取端；每取走一个值归还一个额度。
struct ReceiverIter {
    receiver: UnboundedReceiver<Payload>,
    credit: Operator,
}

impl Iterator for ReceiverIter {
    type Item = Payload;

    fn next(&mut self) -> Option<Payload> {
        let value = self.receiver.blocking_recv()?;
        self.credit.add_local_allowance(1);
        Some(value)
    }
}
