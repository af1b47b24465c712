//! # runtime：工作池契约
//!
//! ## 契约声明（What）
//! - [`WorkPool`] 是状态机消费的唯一调度能力：`submit` 派发可能阻塞的任务（客户代码、票据泵、
//!   终止回调），`schedule` 在延迟后执行任务并返回可取消的 [`TimerHandle`]；
//! - 实现**不得**在 `submit`/`schedule` 调用栈内同步执行任务，否则会破坏“持锁期间不回调客户代码”的约束。
//!
//! ## 并发语义（How）
//! - 不同操作的任务可以并行执行；同一操作内部的串行性由操作自身的“在途标志”保证，而非依赖工作池。
//!
//! ## 设计取舍（Trade-offs）
//! - 默认实现 [`TokioWorkPool`] 以 `spawn_blocking` 承载同步风格的客户代码，定时器则使用
//!   `tokio::time::sleep`；阻塞线程池容量由宿主运行时决定。

use std::time::Duration;

use tokio::runtime::Handle;

/// 派发到工作池的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 工作池能力。
pub trait WorkPool: Send + Sync + 'static {
    /// 派发一个任务，立即返回。
    fn submit(&self, task: Task);

    /// 在 `delay` 之后执行任务；返回的句柄可在触发前取消。
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// 定时任务句柄；取消是幂等的，触发后取消不产生任何效果。
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    /// 以取消动作构造句柄。
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// 无需取消动作的句柄。
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// 取消尚未触发的定时任务。
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl core::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// 基于 Tokio 运行时句柄的工作池。
///
/// # 教案式说明
/// - **意图 (Why)**：客户代码可能同步阻塞（例如流式请求适配器中的 `blocking_recv`），必须运行在阻塞线程池；
/// - **逻辑 (How)**：`submit` → `Handle::spawn_blocking`；`schedule` → 在异步任务中 `sleep` 后执行，
///   取消时调用 `AbortHandle::abort`；
/// - **契约 (What)**：持有的 [`Handle`] 必须在工作池存活期间保持有效。
#[derive(Clone, Debug)]
pub struct TokioWorkPool {
    handle: Handle,
}

impl TokioWorkPool {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 使用当前上下文中的运行时；不在运行时内调用会 panic（与 `Handle::current` 一致）。
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl WorkPool for TokioWorkPool {
    fn submit(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        let abort = join.abort_handle();
        TimerHandle::new(move || abort.abort())
    }
}
