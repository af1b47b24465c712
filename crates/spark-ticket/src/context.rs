//! # context：操作上下文
//!
//! ## 核心意图（Why）
//! - 为客户代码提供操作的只读视图：是否仍在进行、剩余时间、追踪 ID，以及注册终止回调的唯一入口；
//! - Back 侧业务代码感知远端取消的方式只有两种：轮询 [`OperationContext::is_active`] 或注册终止回调，
//!   状态机从不向正在运行的业务代码“注入”错误。
//!
//! ## 行为契约（What）
//! - 终态在上下文中只写一次；写入与回调提取在上下文自身的互斥锁内完成，回调调用发生在锁外；
//! - 每个回调恰好被调用一次，参数为最终终态；若注册时已终止，回调不会被调用，终态作为返回值交还调用方。
//!
//! ## 风险提示（Trade-offs）
//! - 上下文锁是叶子锁：持有期间不会再获取任何其他锁，因此可以在操作锁内安全地写入终态。

use std::{
    error::Error,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::warn;

use crate::{error::BoxError, outcome::Outcome, ticket::OperationId};

/// 终止回调。
pub type TerminationCallback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// 操作上下文，克隆成本为一次引用计数递增。
#[derive(Clone)]
pub struct OperationContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    operation_id: OperationId,
    trace_id: Option<Arc<str>>,
    state: Mutex<ContextState>,
}

struct ContextState {
    outcome: Option<Outcome>,
    deadline: Instant,
    callbacks: Vec<TerminationCallback>,
    failure: Option<Arc<dyn Error + Send + Sync + 'static>>,
}

impl OperationContext {
    pub(crate) fn new(
        operation_id: OperationId,
        trace_id: Option<Arc<str>>,
        deadline: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                operation_id,
                trace_id,
                state: Mutex::new(ContextState {
                    outcome: None,
                    deadline,
                    callbacks: Vec::new(),
                    failure: None,
                }),
            }),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.inner.operation_id
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.inner.trace_id.as_deref()
    }

    /// 操作是否尚未被赋予终态。
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().outcome.is_none()
    }

    /// 已赋予的终态。
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.state.lock().outcome
    }

    /// 注册终止回调。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：返回 `None` 表示回调已登记，将来恰好触发一次；返回 `Some(outcome)` 表示操作早已终止，
    ///   回调被丢弃，调用方需自行处理该终态；
    /// - **风险 (Trade-offs)**：回调在工作池线程中执行，不应长时间阻塞。
    pub fn add_termination_callback(
        &self,
        callback: impl FnOnce(Outcome) + Send + 'static,
    ) -> Option<Outcome> {
        let mut state = self.inner.state.lock();
        match state.outcome {
            Some(outcome) => Some(outcome),
            None => {
                state.callbacks.push(Box::new(callback));
                None
            }
        }
    }

    /// 距截止时间的剩余时长，逾期时为零。
    ///
    /// 读数为零并不意味着已经过期：过期只由过期管理器的定时器触发。
    pub fn time_remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// 当前截止时间（绝对时间点）。
    pub fn deadline(&self) -> Instant {
        self.inner.state.lock().deadline
    }

    /// 记录导致失败的原因，仅用于诊断，不会终止操作。只保留第一次记录。
    pub fn fail(&self, error: impl Into<BoxError>) {
        let mut state = self.inner.state.lock();
        if state.failure.is_none() {
            state.failure = Some(Arc::from(error.into()));
        }
    }

    /// 已记录的失败原因。
    pub fn failure(&self) -> Option<Arc<dyn Error + Send + Sync + 'static>> {
        self.inner.state.lock().failure.clone()
    }

    pub(crate) fn set_deadline(&self, deadline: Instant) {
        self.inner.state.lock().deadline = deadline;
    }

    /// 写入终态并取出全部待触发回调；重复调用返回空列表。
    pub(crate) fn terminate(&self, outcome: Outcome) -> Vec<TerminationCallback> {
        let mut state = self.inner.state.lock();
        if state.outcome.is_some() {
            return Vec::new();
        }
        state.outcome = Some(outcome);
        std::mem::take(&mut state.callbacks)
    }
}

impl core::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OperationContext")
            .field("operation_id", &self.inner.operation_id)
            .field("trace_id", &self.inner.trace_id)
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// 按登记顺序调用终止回调；单个回调 panic 不影响其余回调。
pub(crate) fn fire_callbacks(
    operation_id: OperationId,
    outcome: Outcome,
    callbacks: Vec<TerminationCallback>,
) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
            warn!(%operation_id, %outcome, "termination callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> OperationContext {
        OperationContext::new(
            OperationId::generate(),
            Some(Arc::from("t1")),
            Instant::now() + Duration::from_secs(5),
        )
    }

    #[test]
    fn callbacks_fire_once_with_first_outcome() {
        let context = context();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        assert_eq!(
            context.add_termination_callback(move |outcome| sink.lock().push(outcome)),
            None
        );

        let callbacks = context.terminate(Outcome::Cancelled);
        assert_eq!(callbacks.len(), 1);
        assert!(context.terminate(Outcome::Expired).is_empty());
        fire_callbacks(context.operation_id(), Outcome::Cancelled, callbacks);

        assert_eq!(*seen.lock(), vec![Outcome::Cancelled]);
        assert!(!context.is_active());
        assert_eq!(
            context.add_termination_callback(|_| unreachable!("late callback must not run")),
            Some(Outcome::Cancelled)
        );
    }

    #[test]
    fn fail_keeps_first_cause_without_terminating() {
        let context = context();
        context.fail("first");
        context.fail("second");
        assert!(context.is_active());
        assert_eq!(context.failure().map(|err| err.to_string()), Some("first".into()));
        assert_eq!(context.trace_id(), Some("t1"));
        assert!(context.time_remaining() <= Duration::from_secs(5));
    }

    #[tracing_test::traced_test]
    #[test]
    fn panicking_callback_does_not_stop_the_rest() {
        let context = context();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        context.add_termination_callback(|_| panic!("callback blew up"));
        context.add_termination_callback(move |_| *flag.lock() = true);

        let callbacks = context.terminate(Outcome::Expired);
        fire_callbacks(context.operation_id(), Outcome::Expired, callbacks);

        assert!(*ran.lock());
        assert!(logs_contain("termination callback panicked"));
    }
}
