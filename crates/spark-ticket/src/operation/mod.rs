//! # operation：单个 RPC 操作的状态机
//!
//! ## 核心意图（Why）
//! - 把终态、出站、过期、入站序号与入站投递五个管理器组合在一把 `parking_lot::Mutex` 之下，
//!   让并发到达的票据、本地调用与定时器在同一临界区内裁决；
//! - 客户代码（消费者、服务入口、终止回调）与链路投递从不在锁内执行。
//!
//! ## 逻辑解析（How）
//! - 每次状态变更都走 [`Operation::with_state`]：持锁修改状态后，在同一临界区内“结算”出后续动作
//!   （启动票据泵、启动投递步骤、宣告终态、释放出表），解锁后再把这些动作派发到工作池；
//! - 票据泵与投递步骤各自由一个“在途标志”保护，任意时刻每个方向至多一个任务，因此顺序天然成立；
//! - 操作在终态已定、且票据泵与投递任务都空闲后，才从所属端的操作表中移除。
//!
//! ## 风险提示（Trade-offs）
//! - 链路调用发生在票据泵任务中且不持锁：进程内直连时对端会在同一线程上同步处理票据，
//!   因此对端处理必须同样遵守“锁内不回调”的约束，否则可能形成跨操作死锁。

mod expiration;
mod ingestion;
mod operator;
mod outbound;
mod reception;
mod termination;
mod transmission;

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    context::{OperationContext, TerminationCallback, fire_callbacks},
    customer::{Consumer, Servicer, Subscription},
    ends::OperationTable,
    error::{BoxError, TicketError},
    outcome::Outcome,
    runtime::WorkPool,
    ticket::{InboundTicket, OperationId, Payload, Segment, SegmentKind, SubscriptionKind},
};

use self::{
    expiration::ExpirationManager,
    ingestion::{ConsumerSource, IngestStep, IngestionManager, Readiness},
    reception::ReceptionManager,
    termination::TerminationManager,
    transmission::{TransmissionManager, TransmissionPolicy},
};

pub use self::operator::{OperationHandle, Operator};
pub(crate) use self::outbound::{BackOutbound, FrontOutbound, Outbound};

/// 操作所在的一端。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Front,
    Back,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Side::Front => "front",
            Side::Back => "back",
        }
    }

    /// 本端客户代码失败时的终态。
    fn customer_failure(self) -> Outcome {
        match self {
            Side::Front => Outcome::ServicedFailure,
            Side::Back => Outcome::ServicerFailure,
        }
    }
}

/// 两端共用的创建参数。
pub(crate) struct OperationSetup {
    pub(crate) id: OperationId,
    pub(crate) trace_id: Option<Arc<str>>,
    pub(crate) timeout: Duration,
    pub(crate) maximum_timeout: Duration,
    pub(crate) local_allowance: Option<u64>,
    pub(crate) pool: Arc<dyn WorkPool>,
    pub(crate) table: Weak<OperationTable>,
}

pub(crate) struct Operation {
    id: OperationId,
    side: Side,
    context: OperationContext,
    pool: Arc<dyn WorkPool>,
    outbound: Box<dyn Outbound>,
    table: Weak<OperationTable>,
    state: Mutex<OperationState>,
}

struct OperationState {
    termination: TerminationManager,
    transmission: TransmissionManager,
    expiration: ExpirationManager,
    reception: ReceptionManager,
    ingestion: IngestionManager,
    released: bool,
}

/// 在锁内结算、在锁外执行的后续动作。
#[derive(Default)]
struct Followup {
    transmit: bool,
    ingest: Option<IngestStep>,
    announcement: Option<(Outcome, Vec<TerminationCallback>)>,
    release: Option<Outcome>,
}

impl Operation {
    /// 构造 Front 侧操作，发起票据已排入出站队列；调用方随后必须调用 [`start`](Self::start)。
    pub(crate) fn front(
        setup: OperationSetup,
        outbound: FrontOutbound,
        subscription: &Subscription,
        commencement: Segment,
    ) -> Arc<Self> {
        let source = match subscription {
            Subscription::Full(ingestor) => Some(ConsumerSource::Ingestor(Arc::clone(ingestor))),
            Subscription::TerminationOnly | Subscription::None => None,
        };
        let mut termination = TerminationManager::front(subscription.kind());
        let mut transmission = TransmissionManager::new(TransmissionPolicy::Full);
        if commencement.completes_stream() {
            termination.emission_complete();
        }
        transmission.kick_off(commencement);
        let local_allowance = source.as_ref().and(setup.local_allowance);
        if let Some(allowance) = local_allowance {
            transmission.allowance(allowance);
        }
        let ingestion = IngestionManager::new(source, local_allowance);
        Self::assemble(
            setup,
            Side::Front,
            Box::new(outbound),
            termination,
            transmission,
            ingestion,
        )
    }

    /// 构造 Back 侧操作；发起票据随后经 [`handle_ticket`](Self::handle_ticket) 正常入站。
    pub(crate) fn back(
        setup: OperationSetup,
        outbound: BackOutbound,
        servicer: Arc<dyn Servicer>,
        name: Arc<str>,
        subscription: SubscriptionKind,
    ) -> Arc<Self> {
        let policy = TransmissionPolicy::for_subscription(subscription);
        let termination = TerminationManager::back(policy);
        let mut transmission = TransmissionManager::new(policy);
        transmission.mark_remote_aware();
        if let Some(allowance) = setup.local_allowance {
            transmission.allowance(allowance);
        }
        let ingestion = IngestionManager::new(
            Some(ConsumerSource::Servicer { servicer, name }),
            setup.local_allowance,
        );
        Self::assemble(
            setup,
            Side::Back,
            Box::new(outbound),
            termination,
            transmission,
            ingestion,
        )
    }

    fn assemble(
        setup: OperationSetup,
        side: Side,
        outbound: Box<dyn Outbound>,
        termination: TerminationManager,
        transmission: TransmissionManager,
        ingestion: IngestionManager,
    ) -> Arc<Self> {
        let origin = Instant::now();
        let expiration = ExpirationManager::new(origin, setup.timeout, setup.maximum_timeout);
        let context = OperationContext::new(setup.id, setup.trace_id, expiration.deadline());
        Arc::new(Self {
            id: setup.id,
            side,
            context,
            pool: setup.pool,
            outbound,
            table: setup.table,
            state: Mutex::new(OperationState {
                termination,
                transmission,
                expiration,
                reception: ReceptionManager::new(),
                ingestion,
                released: false,
            }),
        })
    }

    pub(crate) fn id(&self) -> OperationId {
        self.id
    }

    pub(crate) fn context(&self) -> &OperationContext {
        &self.context
    }

    /// 布防过期定时器并派发首批动作（发起票据、消费者创建）。
    pub(crate) fn start(self: &Arc<Self>) {
        self.with_state(|state| {
            let timeout = state.expiration.timeout();
            self.rearm(state, timeout);
        });
    }

    /// 处理一张入站票据。畸形或乱序票据只会让本操作以 `RECEPTION_FAILURE` 终止。
    pub(crate) fn handle_ticket<T: InboundTicket>(self: &Arc<Self>, ticket: T) {
        let sequence_number = ticket.sequence_number();
        if let Err(error) = ticket.check() {
            warn!(
                operation_id = %self.id,
                side = self.side.as_str(),
                sequence_number,
                %error,
                "malformed ticket"
            );
            self.context.fail(error);
            self.with_state(|state| {
                self.abort_in(state, Outcome::ReceptionFailure, true);
            });
            return;
        }
        let segment = ticket.into_segment();
        self.with_state(|state| self.receive_in(state, sequence_number, segment));
    }

    /// 以异常终态结束操作并通知对端；`Completed` 不是合法的中止原因，会被忽略。
    pub(crate) fn abort(self: &Arc<Self>, outcome: Outcome) {
        if !outcome.is_abortive() {
            debug!(operation_id = %self.id, "ignoring abort with a non-abortive outcome");
            return;
        }
        self.with_state(|state| {
            self.abort_in(state, outcome, true);
        });
    }

    pub(crate) fn cancel(self: &Arc<Self>) {
        self.abort(Outcome::Cancelled);
    }

    pub(crate) fn advance(
        self: &Arc<Self>,
        payload: Option<Payload>,
        complete: bool,
    ) -> Result<(), TicketError> {
        self.with_state(|state| {
            if state.transmission.emitted_completion() {
                return Err(TicketError::CompletionAlreadyEmitted {
                    operation_id: self.id,
                });
            }
            if !state.termination.is_active() {
                return Ok(());
            }
            state.transmission.advance(payload, complete);
            if complete {
                state.termination.emission_complete();
            }
            Ok(())
        })
    }

    pub(crate) fn add_local_allowance(self: &Arc<Self>, allowance: u64) {
        self.with_state(|state| {
            if state.termination.is_active() && state.ingestion.add_allowance(allowance) {
                state.transmission.allowance(allowance);
            }
        });
    }

    pub(crate) fn set_local_allowance(self: &Arc<Self>, allowance: u64) {
        self.with_state(|state| {
            if !state.termination.is_active() {
                return;
            }
            if let Some(grant) = state.ingestion.set_allowance(allowance) {
                state.transmission.allowance(grant);
            }
        });
    }

    pub(crate) fn change_timeout(self: &Arc<Self>, timeout: Duration) {
        self.with_state(|state| {
            if !state.termination.is_active() {
                return;
            }
            self.rearm(state, timeout);
            if self.side == Side::Front {
                state.transmission.timeout(timeout);
            }
        });
    }

    fn expire(self: &Arc<Self>, generation: u64) {
        self.with_state(|state| {
            if state.expiration.is_current(generation) && state.termination.expire() {
                debug!(operation_id = %self.id, side = self.side.as_str(), "operation expired");
                self.wind_down(state, Outcome::Expired, true);
            }
        });
    }

    fn receive_in(
        self: &Arc<Self>,
        state: &mut OperationState,
        sequence_number: u64,
        segment: Segment,
    ) {
        if !state.termination.is_active() {
            debug!(
                operation_id = %self.id,
                sequence_number,
                "dropping ticket for a terminated operation"
            );
            return;
        }
        if let Err(fault) = state.reception.receive(sequence_number, &segment) {
            warn!(
                operation_id = %self.id,
                side = self.side.as_str(),
                %fault,
                "ticket violates sequencing"
            );
            self.context.fail(fault);
            self.abort_in(state, Outcome::ReceptionFailure, true);
            return;
        }
        let completes = segment.completes_stream();
        let Segment {
            kind,
            payload,
            timeout,
            allowance,
            details,
        } = segment;
        if let SegmentKind::Termination(outcome) = kind {
            if state.termination.reception_complete(Some(outcome)) {
                debug!(
                    operation_id = %self.id,
                    %outcome,
                    details = details.as_deref(),
                    "remote terminated operation"
                );
                if let Some(details) = details {
                    self.context.fail(details.to_string());
                }
                self.wind_down(state, outcome, false);
            }
            return;
        }
        if let Some(timeout) = timeout {
            self.rearm(state, timeout);
        }
        if let Some(allowance) = allowance {
            state.transmission.add_remote_allowance(allowance);
        }
        if let Some(payload) = payload {
            state.ingestion.enqueue(payload);
        }
        if completes {
            state.ingestion.remote_complete();
            state.transmission.remote_complete();
            state.termination.reception_complete(None);
        }
    }

    fn abort_in(&self, state: &mut OperationState, outcome: Outcome, notify: bool) -> bool {
        if !state.termination.abort(outcome) {
            return false;
        }
        self.wind_down(state, outcome, notify);
        true
    }

    /// 异常终态已写入后，停止两个方向的后续工作。通知对端时附带已记录的失败原因。
    fn wind_down(&self, state: &mut OperationState, outcome: Outcome, notify: bool) {
        let details = notify
            .then(|| self.context.failure())
            .flatten()
            .map(|failure| Arc::from(failure.to_string()));
        state.transmission.abort(notify.then_some(outcome), details);
        state.ingestion.abort();
    }

    fn rearm(self: &Arc<Self>, state: &mut OperationState, timeout: Duration) {
        let weak = Arc::downgrade(self);
        let pool = &self.pool;
        let deadline = state.expiration.change_timeout(timeout, move |generation, delay| {
            pool.schedule(
                delay,
                Box::new(move || {
                    if let Some(operation) = weak.upgrade() {
                        operation.expire(generation);
                    }
                }),
            )
        });
        if let Some(deadline) = deadline {
            self.context.set_deadline(deadline);
        }
    }

    fn with_state<R>(self: &Arc<Self>, f: impl FnOnce(&mut OperationState) -> R) -> R {
        let (result, followup) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            let followup = self.settle(&mut state);
            (result, followup)
        };
        self.dispatch(followup);
        result
    }

    fn settle(&self, state: &mut OperationState) -> Followup {
        let mut followup = Followup::default();
        if state.termination.is_active() {
            match state.ingestion.next_step() {
                Readiness::Step(step) => followup.ingest = Some(step),
                Readiness::Finished => {
                    state.termination.ingestion_complete();
                }
                Readiness::Idle => {}
            }
        }
        if let Some(outcome) = state.termination.take_announcement() {
            state.expiration.terminate();
            state.transmission.close();
            state.ingestion.abort();
            debug!(
                operation_id = %self.id,
                side = self.side.as_str(),
                %outcome,
                "operation terminated"
            );
            followup.announcement = Some((outcome, self.context.terminate(outcome)));
        }
        if !state.transmission.transmitting && state.transmission.has_ready() {
            state.transmission.transmitting = true;
            followup.transmit = true;
        }
        if let Some(outcome) = state.termination.outcome()
            && !state.released
            && !state.transmission.transmitting
            && !state.ingestion.delivering
        {
            state.released = true;
            followup.release = Some(outcome);
        }
        followup
    }

    fn dispatch(self: &Arc<Self>, followup: Followup) {
        if followup.transmit {
            let operation = Arc::clone(self);
            self.pool.submit(Box::new(move || operation.transmit_loop()));
        }
        if let Some(step) = followup.ingest {
            let operation = Arc::clone(self);
            self.pool.submit(Box::new(move || operation.ingest(step)));
        }
        if let Some((outcome, callbacks)) = followup.announcement
            && !callbacks.is_empty()
        {
            let id = self.id;
            self.pool
                .submit(Box::new(move || fire_callbacks(id, outcome, callbacks)));
        }
        if let Some(outcome) = followup.release
            && let Some(table) = self.table.upgrade()
        {
            table.release(self.id, outcome);
        }
    }

    /// 票据泵：逐张取出就绪票据并交给链路，直到没有可发送的票据。
    fn transmit_loop(self: Arc<Self>) {
        loop {
            let next = self.with_state(|state| {
                let next = state.transmission.take_ready();
                if next.is_none() {
                    state.transmission.transmitting = false;
                }
                next
            });
            let Some((sequence_number, segment)) = next else {
                return;
            };
            let completes = segment.completes_stream();
            match self.outbound.transmit(self.id, sequence_number, segment) {
                Ok(()) if completes => self.with_state(|state| {
                    state.termination.transmission_complete();
                }),
                Ok(()) => {}
                Err(error) => {
                    warn!(
                        operation_id = %self.id,
                        side = self.side.as_str(),
                        sequence_number,
                        %error,
                        "link refused ticket"
                    );
                    self.with_state(|state| {
                        if self.abort_in(state, Outcome::TransmissionFailure, false) {
                            self.context.fail(error);
                        }
                    });
                }
            }
        }
    }

    /// 执行一个投递步骤（客户代码），然后在锁内结算结果。
    fn ingest(self: Arc<Self>, step: IngestStep) {
        let finishes = step.finishes();
        let result = match step {
            IngestStep::Start(source) => self.start_consumer(source).map(Some),
            IngestStep::Deliver {
                consumer,
                payload,
                terminate,
            } => guarded(|| {
                if terminate {
                    consumer.consume_and_terminate(payload)
                } else {
                    consumer.consume(payload)
                }
            })
            .map(|()| None)
            .map_err(|error| (self.side.customer_failure(), error)),
            IngestStep::Terminate(consumer) => guarded(|| consumer.terminate())
                .map(|()| None)
                .map_err(|error| (self.side.customer_failure(), error)),
        };
        self.with_state(|state| {
            state.ingestion.step_done();
            match result {
                Ok(Some(consumer)) => state.ingestion.started(consumer),
                Ok(None) => {
                    if finishes {
                        state.termination.ingestion_complete();
                    }
                }
                Err((outcome, error)) => {
                    if state.termination.is_active() {
                        warn!(
                            operation_id = %self.id,
                            side = self.side.as_str(),
                            %outcome,
                            %error,
                            "customer code failed"
                        );
                        self.context.fail(error);
                        self.abort_in(state, outcome, true);
                    }
                }
            }
        });
    }

    fn start_consumer(
        self: &Arc<Self>,
        source: ConsumerSource,
    ) -> Result<Arc<dyn Consumer>, (Outcome, BoxError)> {
        match source {
            ConsumerSource::Ingestor(ingestor) => guarded(|| ingestor.consumer(&self.context))
                .map_err(|error| (Outcome::ServicedFailure, error)),
            ConsumerSource::Servicer { servicer, name } => {
                let operator = Operator::new(Arc::clone(self));
                match catch_unwind(AssertUnwindSafe(|| {
                    servicer.service(&name, &self.context, operator)
                })) {
                    Ok(Ok(consumer)) => Ok(consumer),
                    Ok(Err(error)) => Err((error.outcome(), Box::new(error) as BoxError)),
                    Err(_) => Err((Outcome::ServicerFailure, "servicer panicked".into())),
                }
            }
        }
    }
}

/// 调用客户代码，把 panic 折叠为错误。
fn guarded<T>(call: impl FnOnce() -> Result<T, BoxError>) -> Result<T, BoxError> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| Err("customer code panicked".into()))
}
