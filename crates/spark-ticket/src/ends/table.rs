//! # OperationTable：每个端独享的操作仓储
//!
//! ## 核心意图（Why）
//! - 提供基于 `DashMap` 的并发安全存储，按操作 ID 路由入站票据；
//! - 在操作出表时按终态累计直方图，并在表变空时触发空闲动作。
//!
//! ## 行为契约（What）
//! - `get` 把 `Arc<Operation>` 克隆出分片锁后再返回，调用方从不在持有表锁时进入操作；
//! - `release` 只在真正移除条目时累计统计，同一操作至多计数一次；
//! - 统计与空闲动作各自使用独立的 `parking_lot::Mutex`，与表分片锁互不嵌套。
//!
//! ## 风险提示（Trade-offs）
//! - 空闲动作与新操作插入之间存在竞态：动作登记后立即插入的新操作不会推迟已判定为空闲的动作。

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    operation::Operation,
    outcome::Outcome,
    runtime::{Task, WorkPool},
    ticket::OperationId,
};

/// 按终态统计的已结束操作数量。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    counts: [u64; 7],
}

impl OperationStats {
    /// 某一终态的计数。
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counts[outcome.index()]
    }

    /// 已结束操作总数。
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// 按 [`Outcome::ALL`] 顺序遍历，包含计数为零的终态。
    pub fn iter(&self) -> impl Iterator<Item = (Outcome, u64)> + '_ {
        Outcome::ALL
            .iter()
            .map(move |outcome| (*outcome, self.get(*outcome)))
    }

    fn record(&mut self, outcome: Outcome) {
        self.counts[outcome.index()] += 1;
    }
}

pub(crate) struct OperationTable {
    operations: DashMap<OperationId, Arc<Operation>>,
    stats: Mutex<OperationStats>,
    idle_actions: Mutex<Vec<Task>>,
    pool: Arc<dyn WorkPool>,
}

impl OperationTable {
    pub(crate) fn new(pool: Arc<dyn WorkPool>) -> Arc<Self> {
        Arc::new(Self {
            operations: DashMap::new(),
            stats: Mutex::new(OperationStats::default()),
            idle_actions: Mutex::new(Vec::new()),
            pool,
        })
    }

    pub(crate) fn insert(&self, operation: Arc<Operation>) {
        self.operations.insert(operation.id(), operation);
    }

    pub(crate) fn get(&self, id: OperationId) -> Option<Arc<Operation>> {
        self.operations.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// 查找或创建操作；第二个返回值表示本次是否新建。
    pub(crate) fn get_or_create(
        &self,
        id: OperationId,
        create: impl FnOnce() -> Arc<Operation>,
    ) -> (Arc<Operation>, bool) {
        match self.operations.entry(id) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let operation = create();
                vacant.insert(Arc::clone(&operation));
                (operation, true)
            }
        }
    }

    /// 操作终止且空闲后出表。
    pub(crate) fn release(&self, id: OperationId, outcome: Outcome) {
        if self.operations.remove(&id).is_none() {
            return;
        }
        self.stats.lock().record(outcome);

        let ready = {
            let mut idle_actions = self.idle_actions.lock();
            if self.operations.is_empty() {
                std::mem::take(&mut *idle_actions)
            } else {
                Vec::new()
            }
        };
        for action in ready {
            self.pool.submit(action);
        }
    }

    pub(crate) fn stats(&self) -> OperationStats {
        *self.stats.lock()
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }

    /// 表为空时立即派发，否则等到最后一个操作出表。
    pub(crate) fn add_idle_action(&self, action: Task) {
        let mut idle_actions = self.idle_actions.lock();
        if self.operations.is_empty() {
            drop(idle_actions);
            self.pool.submit(action);
        } else {
            idle_actions.push(action);
        }
    }
}
