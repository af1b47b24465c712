//! # ingestion：入站负载投递
//!
//! ## 核心意图（Why）
//! - 把已通过序号校验的负载按顺序交给客户 [`Consumer`]，同一时刻至多一个投递任务在途；
//! - 消费者本身由客户代码创建（Front 的 `Ingestor`、Back 的 `Servicer`），创建过程同样是一个投递步骤。
//!
//! ## 行为契约（What）
//! - 本地额度为零时负载留在队列中，额度恢复后继续；
//! - 最后一个负载与对端完成同时就绪时，使用 `consume_and_terminate` 一次交付；
//! - 丢弃模式（Front 未订阅完整回程）下不创建消费者，负载到达即丢弃。

use std::{collections::VecDeque, sync::Arc};

use crate::{
    customer::{Consumer, Ingestor, Servicer},
    ticket::Payload,
};

/// 消费者的来源。
pub(crate) enum ConsumerSource {
    Ingestor(Arc<dyn Ingestor>),
    Servicer {
        servicer: Arc<dyn Servicer>,
        name: Arc<str>,
    },
}

enum Slot {
    Unstarted(ConsumerSource),
    Starting,
    Ready(Arc<dyn Consumer>),
    Discarding,
    Closed,
}

/// 一次需要在工作池中执行的投递动作。
pub(crate) enum IngestStep {
    Start(ConsumerSource),
    Deliver {
        consumer: Arc<dyn Consumer>,
        payload: Payload,
        terminate: bool,
    },
    Terminate(Arc<dyn Consumer>),
}

impl IngestStep {
    /// 该步骤成功后，入站方向是否完成。
    pub(crate) fn finishes(&self) -> bool {
        matches!(
            self,
            IngestStep::Terminate(_) | IngestStep::Deliver { terminate: true, .. }
        )
    }
}

pub(crate) enum Readiness {
    Step(IngestStep),
    /// 丢弃模式下对端已完成，无需调用客户代码即可宣告入站完成。
    Finished,
    Idle,
}

pub(crate) struct IngestionManager {
    slot: Slot,
    queue: VecDeque<Payload>,
    remote_complete: bool,
    local_allowance: Option<u64>,
    finished: bool,
    /// 是否有投递任务在途；由操作在锁内维护。
    pub(crate) delivering: bool,
}

impl IngestionManager {
    /// `source` 为 `None` 时进入丢弃模式；`local_allowance` 为 `None` 表示不限额。
    pub(crate) fn new(source: Option<ConsumerSource>, local_allowance: Option<u64>) -> Self {
        Self {
            slot: match source {
                Some(source) => Slot::Unstarted(source),
                None => Slot::Discarding,
            },
            queue: VecDeque::new(),
            remote_complete: false,
            local_allowance,
            finished: false,
            delivering: false,
        }
    }

    pub(crate) fn enqueue(&mut self, payload: Payload) {
        if self.finished || matches!(self.slot, Slot::Discarding | Slot::Closed) {
            return;
        }
        self.queue.push_back(payload);
    }

    pub(crate) fn remote_complete(&mut self) {
        self.remote_complete = true;
    }

    /// 消费者创建完成。
    pub(crate) fn started(&mut self, consumer: Arc<dyn Consumer>) {
        if matches!(self.slot, Slot::Starting) {
            self.slot = Slot::Ready(consumer);
        }
    }

    /// 追加本地额度；不限额时无事可做，返回 `false`。
    pub(crate) fn add_allowance(&mut self, allowance: u64) -> bool {
        match self.local_allowance.as_mut() {
            Some(current) => {
                *current = current.saturating_add(allowance);
                true
            }
            None => false,
        }
    }

    /// 设定本地额度，返回需要授予对端的增量；首次从不限额转为限额时返回完整窗口。
    pub(crate) fn set_allowance(&mut self, allowance: u64) -> Option<u64> {
        let previous = self.local_allowance.replace(allowance);
        match previous {
            None => Some(allowance),
            Some(previous) if allowance > previous => Some(allowance - previous),
            Some(_) => None,
        }
    }

    pub(crate) fn step_done(&mut self) {
        self.delivering = false;
    }

    /// 中止：清空队列并释放消费者，在途步骤返回后不再有新步骤。
    pub(crate) fn abort(&mut self) {
        self.finished = true;
        self.queue.clear();
        self.slot = Slot::Closed;
    }

    /// 计算下一步；返回 `Step` 时 `delivering` 已被置位。
    pub(crate) fn next_step(&mut self) -> Readiness {
        if self.delivering || self.finished {
            return Readiness::Idle;
        }
        let step = match &self.slot {
            Slot::Discarding => {
                self.queue.clear();
                if self.remote_complete {
                    self.finished = true;
                    return Readiness::Finished;
                }
                return Readiness::Idle;
            }
            Slot::Starting | Slot::Closed => return Readiness::Idle,
            Slot::Unstarted(_) => match std::mem::replace(&mut self.slot, Slot::Starting) {
                Slot::Unstarted(source) => IngestStep::Start(source),
                _ => return Readiness::Idle,
            },
            Slot::Ready(consumer) => {
                let consumer = Arc::clone(consumer);
                if !self.queue.is_empty() && self.local_allowance != Some(0) {
                    let Some(payload) = self.queue.pop_front() else {
                        return Readiness::Idle;
                    };
                    if let Some(allowance) = self.local_allowance.as_mut() {
                        *allowance -= 1;
                    }
                    let terminate = self.remote_complete && self.queue.is_empty();
                    self.finished = terminate;
                    IngestStep::Deliver {
                        consumer,
                        payload,
                        terminate,
                    }
                } else if self.queue.is_empty() && self.remote_complete {
                    self.finished = true;
                    IngestStep::Terminate(consumer)
                } else {
                    return Readiness::Idle;
                }
            }
        };
        self.delivering = true;
        Readiness::Step(step)
    }
}
