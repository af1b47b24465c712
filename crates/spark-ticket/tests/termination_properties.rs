//! 终态裁决的性质验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：本地中止、对端终止票据与过期定时器可能以任意顺序交错到达，
//!   协议要求“先到者胜出”，并且终态恰好宣告一次；
//! - **设计手法 (How)**：使用 Proptest 生成随机事件序列，在 [`ManualWorkPool`] 上确定性地驱动一个 Front 操作，
//!   同时维护一个只记录“第一个终止事件”的影子模型；
//! - **合同 (What)**：
//!   1. 终态等于影子模型记录的第一个终止原因；
//!   2. 终止回调恰好触发一次，`operation_stats()` 恰好计数一次；
//!   3. 链路上至多出现一张终止票据，且由对端发起的终止不会被回送。

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use proptest::prelude::*;
use spark_ticket::{
    BackToFrontKind, BackToFrontTicket, Consumer, EndConfig, ForeLink, Front, FrontToBackTicket,
    Outcome, Subscription,
    test_stubs::{ManualWorkPool, RecordingConsumer, RecordingLink},
};

#[derive(Clone, Debug)]
enum Event {
    /// 执行全部排队任务。
    Run,
    /// 本地以给定终态中止（`Completed` 应被忽略）。
    LocalAbort(Outcome),
    Cancel,
    /// 本地推进一个值。
    Advance,
    /// 对端送来一个值。
    RemoteValue,
    /// 对端以给定终态结束操作。
    RemoteTermination(Outcome),
    /// 触发全部未撤销的定时器。
    FireTimers,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop::sample::select(Outcome::ALL.to_vec())
}

fn abortive() -> impl Strategy<Value = Outcome> {
    prop::sample::select(
        Outcome::ALL
            .into_iter()
            .filter(|outcome| outcome.is_abortive())
            .collect::<Vec<_>>(),
    )
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::Run),
        1 => outcome().prop_map(Event::LocalAbort),
        1 => Just(Event::Cancel),
        2 => Just(Event::Advance),
        2 => Just(Event::RemoteValue),
        1 => abortive().prop_map(Event::RemoteTermination),
        1 => Just(Event::FireTimers),
    ]
}

/// 影子模型：只关心第一个终止原因及其来源。
#[derive(Default)]
struct Shadow {
    first: Option<(Outcome, bool)>,
}

impl Shadow {
    fn terminate(&mut self, outcome: Outcome, remote: bool) {
        if self.first.is_none() {
            self.first = Some((outcome, remote));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn first_termination_wins_and_is_announced_once(
        events in prop::collection::vec(event(), 1..32),
    ) {
        let pool = ManualWorkPool::new();
        let front = Front::new(EndConfig::default(), pool.clone()).expect("valid config");
        let link = RecordingLink::<FrontToBackTicket>::new();
        front.join_rear_link(link.clone());

        let recorder = RecordingConsumer::new();
        let consumer: Arc<dyn Consumer> = recorder.clone();
        let handle = front
            .operate(
                "prop",
                Some(Bytes::from_static(b"start")),
                false,
                Some(Duration::from_secs(30)),
                Subscription::full(consumer),
                None,
            )
            .expect("operation commences");

        let announced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&announced);
        prop_assert_eq!(
            handle.context().add_termination_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            None
        );

        let mut shadow = Shadow::default();
        let mut remote_sequence = 0u64;
        for event in events {
            match event {
                Event::Run => {
                    pool.run_until_idle();
                }
                Event::LocalAbort(outcome) => {
                    handle.abort(outcome);
                    if outcome.is_abortive() {
                        shadow.terminate(outcome, false);
                    }
                }
                Event::Cancel => {
                    handle.cancel();
                    shadow.terminate(Outcome::Cancelled, false);
                }
                Event::Advance => {
                    handle
                        .operator()
                        .advance(Some(Bytes::from_static(b"value")), false)
                        .expect("completion is never emitted");
                }
                Event::RemoteValue => {
                    let ticket = BackToFrontTicket::new(
                        handle.operation_id(),
                        remote_sequence,
                        BackToFrontKind::Continuation,
                    )
                    .with_payload(Bytes::from_static(b"reply"));
                    remote_sequence += 1;
                    front.accept_back_to_front_ticket(ticket).expect("accepted");
                }
                Event::RemoteTermination(outcome) => {
                    let kind = BackToFrontKind::for_termination(outcome).expect("abortive outcome");
                    let ticket =
                        BackToFrontTicket::new(handle.operation_id(), remote_sequence, kind);
                    remote_sequence += 1;
                    front.accept_back_to_front_ticket(ticket).expect("accepted");
                    shadow.terminate(outcome, true);
                }
                Event::FireTimers => {
                    if pool.fire_timers() > 0 {
                        shadow.terminate(Outcome::Expired, false);
                    }
                }
            }
        }
        handle.cancel();
        shadow.terminate(Outcome::Cancelled, false);
        pool.run_until_idle();

        let (expected, remote) = shadow.first.expect("cancel always terminates");
        prop_assert_eq!(handle.context().outcome(), Some(expected));
        prop_assert_eq!(announced.load(Ordering::SeqCst), 1);
        prop_assert_eq!(front.operation_count(), 0);
        prop_assert_eq!(front.operation_stats().total(), 1);
        prop_assert_eq!(front.operation_stats().get(expected), 1);
        prop_assert!(!recorder.is_terminated());

        let terminations: Vec<_> = link
            .tickets()
            .into_iter()
            .filter_map(|ticket| ticket.kind.termination_outcome())
            .collect();
        prop_assert!(terminations.len() <= 1);
        if remote {
            prop_assert!(terminations.is_empty());
        } else if let Some(sent) = terminations.first() {
            prop_assert_eq!(*sent, expected);
        }
    }
}
