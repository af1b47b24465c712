//! 进程内直连的端到端场景
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以真实的 [`TokioWorkPool`] 与 [`connect`] 直连一对 Front/Back，
//!   验证零消息往返、流式回显、取消、过期以及调用便捷层在并发调度下的行为；
//! - **设计手法 (How)**：所有断言都通过 `wait_until` 轮询可观测状态（终态、操作数、统计），
//!   不依赖任务的具体交错顺序；需要核对线上票据序列的场景改用记录票据的转发链路；
//! - **合同 (What)**：每个场景最终两端操作表都清空，统计恰好反映一次终态。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_ticket::{
    Back, BackToFrontKind, BackToFrontTicket, BoxError, CallError, Consumer, EndConfig, ForeLink,
    Front, FrontToBackKind, FrontToBackTicket, LinkError, MethodImplementation, MethodServicer,
    OperationContext, Operator, Outcome, Payload, PayloadIter, RearLink, ServiceError, Servicer,
    Subscription, TokioWorkPool, WeakBack, WeakFront, WorkPool, calls, connect,
    test_stubs::{ConsumerEvent, RecordingConsumer},
};

/// 把输入原样写回：`Operator` 自身就是消费者。
struct EchoServicer;

impl Servicer for EchoServicer {
    fn service(
        &self,
        _name: &str,
        _context: &OperationContext,
        output: Operator,
    ) -> Result<Arc<dyn Consumer>, ServiceError> {
        Ok(Arc::new(output))
    }
}

/// 只记录请求、从不回复的服务。
struct SilentServicer {
    consumer: Arc<RecordingConsumer>,
    contexts: Mutex<Vec<OperationContext>>,
}

impl Servicer for SilentServicer {
    fn service(
        &self,
        _name: &str,
        context: &OperationContext,
        _output: Operator,
    ) -> Result<Arc<dyn Consumer>, ServiceError> {
        self.contexts.lock().push(context.clone());
        let consumer: Arc<dyn Consumer> = self.consumer.clone();
        Ok(consumer)
    }
}

/// 收到发起票据即宣告完成、不回送任何值的服务。
struct CompletingServicer {
    contexts: Mutex<Vec<OperationContext>>,
}

impl Servicer for CompletingServicer {
    fn service(
        &self,
        _name: &str,
        context: &OperationContext,
        output: Operator,
    ) -> Result<Arc<dyn Consumer>, ServiceError> {
        self.contexts.lock().push(context.clone());
        output
            .advance(None, true)
            .map_err(|error| ServiceError::Failure(error.into()))?;
        let requests: Arc<dyn Consumer> = RecordingConsumer::new();
        Ok(requests)
    }
}

/// 逐个回送请求值，完成标记单独成票。
struct StepwiseEchoServicer;

struct StepwiseEcho {
    output: Operator,
}

impl Consumer for StepwiseEcho {
    fn consume(&self, value: Payload) -> Result<(), BoxError> {
        self.output.advance(Some(value), false)?;
        Ok(())
    }

    fn terminate(&self) -> Result<(), BoxError> {
        self.output.advance(None, true)?;
        Ok(())
    }
}

impl Servicer for StepwiseEchoServicer {
    fn service(
        &self,
        _name: &str,
        _context: &OperationContext,
        output: Operator,
    ) -> Result<Arc<dyn Consumer>, ServiceError> {
        Ok(Arc::new(StepwiseEcho { output }))
    }
}

/// 记录经过的 Front→Back 票据并转交 Back。
struct TappedRearLink {
    back: WeakBack,
    tickets: Mutex<Vec<FrontToBackTicket>>,
}

impl RearLink for TappedRearLink {
    fn accept_front_to_back_ticket(&self, ticket: FrontToBackTicket) -> Result<(), LinkError> {
        self.tickets.lock().push(ticket.clone());
        self.back.accept_front_to_back_ticket(ticket)
    }
}

/// 记录经过的 Back→Front 票据并转交 Front。
struct TappedForeLink {
    front: WeakFront,
    tickets: Mutex<Vec<BackToFrontTicket>>,
}

impl ForeLink for TappedForeLink {
    fn accept_back_to_front_ticket(&self, ticket: BackToFrontTicket) -> Result<(), LinkError> {
        self.tickets.lock().push(ticket.clone());
        self.front.accept_back_to_front_ticket(ticket)
    }
}

fn pool() -> Arc<dyn WorkPool> {
    Arc::new(TokioWorkPool::current())
}

fn pair(servicer: Arc<dyn Servicer>) -> (Front, Back) {
    pair_with(EndConfig::default(), servicer)
}

fn pair_with(config: EndConfig, servicer: Arc<dyn Servicer>) -> (Front, Back) {
    let front = Front::new(config.clone(), pool()).expect("valid config");
    let back = Back::new(config, pool(), servicer).expect("valid config");
    connect(&front, &back);
    (front, back)
}

/// 与 [`pair`] 相同，但两个方向的票据都经过可观察的链路。
fn tapped_pair(
    servicer: Arc<dyn Servicer>,
) -> (Front, Back, Arc<TappedRearLink>, Arc<TappedForeLink>) {
    let front = Front::new(EndConfig::default(), pool()).expect("valid config");
    let back = Back::new(EndConfig::default(), pool(), servicer).expect("valid config");
    let rear = Arc::new(TappedRearLink {
        back: back.downgrade(),
        tickets: Mutex::new(Vec::new()),
    });
    let fore = Arc::new(TappedForeLink {
        front: front.downgrade(),
        tickets: Mutex::new(Vec::new()),
    });
    front.join_rear_link(rear.clone());
    back.join_fore_link(fore.clone());
    (front, back, rear, fore)
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn full(recorder: &Arc<RecordingConsumer>) -> Subscription {
    let consumer: Arc<dyn Consumer> = recorder.clone();
    Subscription::full(consumer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_message_round_trip() {
    let (front, back) = pair(Arc::new(EchoServicer));
    let recorder = RecordingConsumer::new();

    let handle = front
        .operate("echo", None, true, None, full(&recorder), None)
        .expect("operation commences");

    wait_until("both ends drain", || {
        front.operation_count() == 0 && back.operation_count() == 0
    })
    .await;
    assert_eq!(handle.context().outcome(), Some(Outcome::Completed));
    assert_eq!(recorder.events(), vec![ConsumerEvent::Terminated]);
    assert_eq!(front.operation_stats().get(Outcome::Completed), 1);
    assert_eq!(back.operation_stats().get(Outcome::Completed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn termination_only_round_trip_carries_trace_id() {
    let servicer = Arc::new(CompletingServicer {
        contexts: Mutex::new(Vec::new()),
    });
    let (front, back) = pair(servicer.clone());

    let handle = front
        .operate(
            "echo",
            None,
            true,
            Some(Duration::from_secs(5)),
            Subscription::TerminationOnly,
            Some("t1"),
        )
        .expect("operation commences");

    wait_until("front drains", || front.operation_count() == 0).await;
    assert_eq!(handle.context().outcome(), Some(Outcome::Completed));
    assert_eq!(front.operation_stats().get(Outcome::Completed), 1);
    assert_eq!(front.operation_stats().total(), 1);

    wait_until("back drains", || back.operation_count() == 0).await;
    let back_stats = back.operation_stats();
    assert_eq!(back_stats.total(), back_stats.get(Outcome::Completed));
    assert_eq!(servicer.contexts.lock()[0].trace_id(), Some("t1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn continuations_echo_back_as_continuations_then_completion() {
    let (front, back, rear, fore) = tapped_pair(Arc::new(StepwiseEchoServicer));
    let recorder = RecordingConsumer::new();
    let values = vec![
        Bytes::from_static(b"p0"),
        Bytes::from_static(b"p1"),
        Bytes::from_static(b"p2"),
    ];

    let handle = front
        .operate("echo", None, false, None, full(&recorder), None)
        .expect("operation commences");
    for value in &values {
        handle
            .operator()
            .advance(Some(value.clone()), false)
            .expect("advance");
    }
    handle.operator().advance(None, true).expect("complete");

    wait_until("both ends drain", || {
        front.operation_count() == 0 && back.operation_count() == 0
    })
    .await;
    assert_eq!(handle.context().outcome(), Some(Outcome::Completed));

    let sent: Vec<_> = rear
        .tickets
        .lock()
        .iter()
        .map(|ticket| (ticket.kind, ticket.payload.clone()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (FrontToBackKind::Commencement, None),
            (FrontToBackKind::Continuation, Some(values[0].clone())),
            (FrontToBackKind::Continuation, Some(values[1].clone())),
            (FrontToBackKind::Continuation, Some(values[2].clone())),
            (FrontToBackKind::Completion, None),
        ]
    );

    let echoed: Vec<_> = fore
        .tickets
        .lock()
        .iter()
        .filter(|ticket| ticket.kind != BackToFrontKind::Control)
        .map(|ticket| (ticket.sequence_number, ticket.kind, ticket.payload.clone()))
        .collect();
    assert_eq!(
        echoed,
        vec![
            (0, BackToFrontKind::Continuation, Some(values[0].clone())),
            (1, BackToFrontKind::Continuation, Some(values[1].clone())),
            (2, BackToFrontKind::Continuation, Some(values[2].clone())),
            (3, BackToFrontKind::Completion, None),
        ]
    );

    let mut expected: Vec<ConsumerEvent> =
        values.iter().cloned().map(ConsumerEvent::Value).collect();
    expected.push(ConsumerEvent::Terminated);
    assert_eq!(recorder.events(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_echo_preserves_order() {
    let (front, back) = pair(Arc::new(EchoServicer));
    let recorder = RecordingConsumer::new();
    let values: Vec<Bytes> = (0..16)
        .map(|index| Bytes::from(format!("value-{index}")))
        .collect();

    let handle = front
        .operate(
            "echo",
            Some(values[0].clone()),
            false,
            Some(Duration::from_secs(5)),
            full(&recorder),
            None,
        )
        .expect("operation commences");
    for (index, value) in values.iter().enumerate().skip(1) {
        let complete = index == values.len() - 1;
        handle
            .operator()
            .advance(Some(value.clone()), complete)
            .expect("advance");
    }

    wait_until("echo completes", || recorder.is_terminated()).await;
    assert_eq!(recorder.values(), values);
    wait_until("both ends drain", || {
        front.operation_count() == 0 && back.operation_count() == 0
    })
    .await;
    assert_eq!(handle.context().outcome(), Some(Outcome::Completed));
    assert_eq!(back.operation_stats().get(Outcome::Completed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_before_any_payload() {
    let requests = RecordingConsumer::new();
    let servicer = Arc::new(SilentServicer {
        consumer: requests.clone(),
        contexts: Mutex::new(Vec::new()),
    });
    let (front, back) = pair(servicer);

    let handle = front
        .operate("silent", None, false, None, Subscription::TerminationOnly, None)
        .expect("operation commences");
    handle.cancel();

    wait_until("both ends drain", || {
        front.operation_count() == 0 && back.operation_count() == 0
    })
    .await;
    assert_eq!(front.operation_stats().get(Outcome::Cancelled), 1);
    assert_eq!(front.operation_stats().total(), 1);
    assert!(requests.values().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expiration_fires_within_margin_on_both_ends() {
    let requests = RecordingConsumer::new();
    let servicer = Arc::new(SilentServicer {
        consumer: requests.clone(),
        contexts: Mutex::new(Vec::new()),
    });
    let (front, back) = pair(servicer.clone());
    let timeout = Duration::from_millis(200);

    let started = Instant::now();
    let handle = front
        .operate(
            "silent",
            Some(Bytes::from_static(b"ping")),
            false,
            Some(timeout),
            Subscription::TerminationOnly,
            None,
        )
        .expect("operation commences");

    wait_until("front expires", || !handle.context().is_active()).await;
    let elapsed = started.elapsed();
    assert_eq!(handle.context().outcome(), Some(Outcome::Expired));
    assert!(elapsed >= timeout, "expired early after {elapsed:?}");
    assert!(
        elapsed < timeout + Duration::from_secs(2),
        "expired late after {elapsed:?}"
    );

    wait_until("back expires", || {
        back.operation_stats().get(Outcome::Expired) == 1
    })
    .await;
    let back_context = servicer.contexts.lock()[0].clone();
    assert_eq!(back_context.outcome(), Some(Outcome::Expired));
    assert_eq!(requests.values(), vec![Bytes::from_static(b"ping")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_action_runs_after_last_operation() {
    let (front, _back) = pair(Arc::new(EchoServicer));
    let recorder = RecordingConsumer::new();
    let idle = Arc::new(AtomicBool::new(false));

    front
        .operate(
            "echo",
            Some(Bytes::from_static(b"x")),
            true,
            None,
            full(&recorder),
            None,
        )
        .expect("operation commences");
    let flag = Arc::clone(&idle);
    front.add_idle_action(move || flag.store(true, Ordering::SeqCst));

    wait_until("idle action", || idle.load(Ordering::SeqCst)).await;
    assert_eq!(front.operation_count(), 0);
    assert_eq!(recorder.values(), vec![Bytes::from_static(b"x")]);
}

fn method_servicer() -> MethodServicer {
    MethodServicer::new(pool())
        .with_method(
            "upper",
            MethodImplementation::unary_unary(|request, _context| {
                Ok(Bytes::from(request.to_ascii_uppercase()))
            }),
        )
        .with_method(
            "split",
            MethodImplementation::unary_stream(|request, _context| {
                let parts: Vec<Bytes> = request
                    .split(|byte| *byte == b',')
                    .map(Bytes::copy_from_slice)
                    .collect();
                Ok(Box::new(parts.into_iter()) as PayloadIter)
            }),
        )
        .with_method(
            "join",
            MethodImplementation::stream_unary(|requests, _context| {
                let joined: Vec<u8> = requests
                    .map(|request| request.to_vec())
                    .collect::<Vec<_>>()
                    .join(&b'+');
                Ok(Bytes::from(joined))
            }),
        )
        .with_method(
            "reverse",
            MethodImplementation::stream_stream(|requests, _context| {
                let mut all: Vec<Bytes> = requests.collect();
                all.reverse();
                Ok(Box::new(all.into_iter()) as PayloadIter)
            }),
        )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn calls_cover_every_cardinality() {
    let (front, back) = pair(Arc::new(method_servicer()));

    let upper = calls::unary_unary(&front, "upper", Bytes::from_static(b"shout"), None)
        .await
        .expect("unary-unary");
    assert_eq!(upper, Bytes::from_static(b"SHOUT"));

    let split = calls::unary_stream(&front, "split", Bytes::from_static(b"a,b,c"), None)
        .expect("unary-stream commences")
        .collect()
        .await
        .expect("unary-stream");
    assert_eq!(
        split,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]
    );

    let joined = calls::stream_unary(
        &front,
        "join",
        vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")],
        None,
    )
    .await
    .expect("stream-unary");
    assert_eq!(joined, Bytes::from_static(b"1+2"));

    let reversed = calls::stream_stream(
        &front,
        "reverse",
        vec![Bytes::from_static(b"x"), Bytes::from_static(b"y")],
        None,
    )
    .expect("stream-stream commences")
    .collect()
    .await
    .expect("stream-stream");
    assert_eq!(
        reversed,
        vec![Bytes::from_static(b"y"), Bytes::from_static(b"x")]
    );

    wait_until("both ends drain", || {
        front.operation_count() == 0 && back.operation_count() == 0
    })
    .await;
    assert_eq!(front.operation_stats().get(Outcome::Completed), 4);
    assert_eq!(back.operation_stats().get(Outcome::Completed), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bounded_allowance_is_replenished_as_values_are_taken() {
    let config = EndConfig::default().with_initial_allowance(Some(1));
    let (front, back) = pair_with(config, Arc::new(method_servicer()));
    let timeout = Some(Duration::from_secs(5));

    let split = calls::unary_stream(&front, "split", Bytes::from_static(b"a,b,c"), timeout)
        .expect("unary-stream commences")
        .collect()
        .await
        .expect("every response arrives within a window of one");
    assert_eq!(
        split,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]
    );

    let reversed = calls::stream_stream(
        &front,
        "reverse",
        vec![
            Bytes::from_static(b"x"),
            Bytes::from_static(b"y"),
            Bytes::from_static(b"z"),
        ],
        timeout,
    )
    .expect("stream-stream commences")
    .collect()
    .await
    .expect("every request reaches the servicer within a window of one");
    assert_eq!(
        reversed,
        vec![
            Bytes::from_static(b"z"),
            Bytes::from_static(b"y"),
            Bytes::from_static(b"x"),
        ]
    );

    wait_until("both ends drain", || {
        front.operation_count() == 0 && back.operation_count() == 0
    })
    .await;
    assert_eq!(front.operation_stats().get(Outcome::Completed), 2);
    assert_eq!(back.operation_stats().get(Outcome::Completed), 2);
    assert_eq!(front.operation_stats().get(Outcome::Expired), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_surfaces_as_reception_failure() {
    let (front, _back) = pair(Arc::new(method_servicer()));

    let error = calls::unary_unary(&front, "missing", Bytes::from_static(b"?"), None)
        .await
        .expect_err("method is not registered");
    assert!(matches!(error, CallError::Aborted(Outcome::ReceptionFailure)));
    assert_eq!(error.outcome(), Some(Outcome::ReceptionFailure));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_a_response_stream_cancels_the_call() {
    let requests = RecordingConsumer::new();
    let servicer = Arc::new(SilentServicer {
        consumer: requests,
        contexts: Mutex::new(Vec::new()),
    });
    let (front, back) = pair(servicer);

    let responses = calls::unary_stream(&front, "silent", Bytes::from_static(b"q"), None)
        .expect("commences");
    wait_until("back accepts", || back.operation_count() == 1).await;
    let context = responses.context().clone();
    drop(responses);

    wait_until("front drains", || front.operation_count() == 0).await;
    assert_eq!(context.outcome(), Some(Outcome::Cancelled));
    wait_until("back drains", || back.operation_count() == 0).await;
    assert_eq!(back.operation_stats().get(Outcome::Cancelled), 1);
}
