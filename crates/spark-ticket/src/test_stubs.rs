//! 测试桩集合：手动驱动的工作池、录制型消费者与录制型链路。
//!
//! # 设计定位（Why）
//! - 状态机的全部并发都经由 [`WorkPool`] 派发；用 [`ManualWorkPool`] 替换后，测试可以逐步推进任务、
//!   手动触发定时器，从而在单线程内确定性地复现竞态；
//! - 录制型消费者与链路把“客户代码看到了什么”“链路上走过了什么”变成可断言的数据。
//!
//! # 契约说明（What）
//! - 这些类型只用于测试与示例；它们不做任何限流或超时处理；
//! - 桩对象内部使用 `parking_lot::Mutex`，在任务中调用不会因毒化而 panic。

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    customer::Consumer,
    error::{BoxError, LinkError},
    link::{ForeLink, RearLink},
    runtime::{Task, TimerHandle, WorkPool},
    ticket::{BackToFrontTicket, FrontToBackTicket, Payload},
};

/// 由测试显式驱动的工作池。
#[derive(Default)]
pub struct ManualWorkPool {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    tasks: VecDeque<Task>,
    timers: Vec<ManualTimer>,
}

struct ManualTimer {
    delay: Duration,
    task: Task,
    cancelled: Arc<AtomicBool>,
}

impl ManualWorkPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 依次执行排队任务（包括执行过程中新派发的任务），返回执行数量。
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        loop {
            let next = self.state.lock().tasks.pop_front();
            match next {
                Some(task) => {
                    task();
                    executed += 1;
                }
                None => return executed,
            }
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// 尚未取消的定时器延迟。
    pub fn armed_timers(&self) -> Vec<Duration> {
        let mut state = self.state.lock();
        state
            .timers
            .retain(|timer| !timer.cancelled.load(Ordering::SeqCst));
        state.timers.iter().map(|timer| timer.delay).collect()
    }

    /// 触发全部未取消的定时器，返回触发数量；定时任务本身同步执行。
    pub fn fire_timers(&self) -> usize {
        let timers = std::mem::take(&mut self.state.lock().timers);
        let mut fired = 0;
        for timer in timers {
            if !timer.cancelled.load(Ordering::SeqCst) {
                (timer.task)();
                fired += 1;
            }
        }
        fired
    }
}

impl WorkPool for ManualWorkPool {
    fn submit(&self, task: Task) {
        self.state.lock().tasks.push_back(task);
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        self.state.lock().timers.push(ManualTimer {
            delay,
            task,
            cancelled,
        });
        TimerHandle::new(move || flag.store(true, Ordering::SeqCst))
    }
}

/// 消费者观测到的事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsumerEvent {
    Value(Payload),
    Terminated,
}

/// 记录全部调用的消费者；可配置为在第 N 个值上失败。
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<ConsumerEvent>>,
    fail_at: Option<usize>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 收到第 `index` 个值（从 0 计）时返回错误。
    pub fn failing_at(index: usize) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fail_at: Some(index),
        })
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().clone()
    }

    pub fn values(&self) -> Vec<Payload> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ConsumerEvent::Value(value) => Some(value.clone()),
                ConsumerEvent::Terminated => None,
            })
            .collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.events.lock().contains(&ConsumerEvent::Terminated)
    }
}

impl Consumer for RecordingConsumer {
    fn consume(&self, value: Payload) -> Result<(), BoxError> {
        let mut events = self.events.lock();
        let seen = events
            .iter()
            .filter(|event| matches!(event, ConsumerEvent::Value(_)))
            .count();
        if self.fail_at == Some(seen) {
            return Err("recording consumer configured to fail".into());
        }
        events.push(ConsumerEvent::Value(value));
        Ok(())
    }

    fn terminate(&self) -> Result<(), BoxError> {
        self.events.lock().push(ConsumerEvent::Terminated);
        Ok(())
    }
}

/// 记录经过的票据；可切换为拒收模式以模拟链路故障。
#[derive(Debug)]
pub struct RecordingLink<T> {
    tickets: Mutex<Vec<T>>,
    refusing: AtomicBool,
}

impl<T> Default for RecordingLink<T> {
    fn default() -> Self {
        Self {
            tickets: Mutex::new(Vec::new()),
            refusing: AtomicBool::new(false),
        }
    }
}

impl<T: Clone> RecordingLink<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tickets(&self) -> Vec<T> {
        self.tickets.lock().clone()
    }

    pub fn refuse(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    fn record(&self, ticket: T) -> Result<(), LinkError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(LinkError::Rejected("recording link refusing".into()));
        }
        self.tickets.lock().push(ticket);
        Ok(())
    }
}

impl RearLink for RecordingLink<FrontToBackTicket> {
    fn accept_front_to_back_ticket(&self, ticket: FrontToBackTicket) -> Result<(), LinkError> {
        self.record(ticket)
    }
}

impl ForeLink for RecordingLink<BackToFrontTicket> {
    fn accept_back_to_front_ticket(&self, ticket: BackToFrontTicket) -> Result<(), LinkError> {
        self.record(ticket)
    }
}
