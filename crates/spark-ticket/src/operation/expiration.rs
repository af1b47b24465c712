//! # expiration：截止时间与定时器
//!
//! - 截止时间恒为 `origin + min(timeout, maximum)`，`origin` 在操作创建时固定，改超时不会“续命”；
//! - 每次重新布防递增代号，触发时代号不匹配的旧定时器视为无效，从而保证 `EXPIRED` 至多生效一次。

use std::time::{Duration, Instant};

use crate::runtime::TimerHandle;

#[derive(Debug)]
pub(crate) struct ExpirationManager {
    origin: Instant,
    maximum: Duration,
    timeout: Duration,
    generation: u64,
    timer: Option<TimerHandle>,
    terminated: bool,
}

impl ExpirationManager {
    pub(crate) fn new(origin: Instant, timeout: Duration, maximum: Duration) -> Self {
        Self {
            origin,
            maximum,
            timeout: timeout.min(maximum),
            generation: 0,
            timer: None,
            terminated: false,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.origin + self.timeout
    }

    /// 以新的超时重新布防，`arm` 接收代号与剩余延迟并返回定时器句柄。
    ///
    /// 返回新的截止时间；已终止时不做任何事并返回 `None`。
    pub(crate) fn change_timeout(
        &mut self,
        timeout: Duration,
        arm: impl FnOnce(u64, Duration) -> TimerHandle,
    ) -> Option<Instant> {
        if self.terminated {
            return None;
        }
        self.timeout = timeout.min(self.maximum);
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.generation += 1;
        let deadline = self.deadline();
        let delay = deadline.saturating_duration_since(Instant::now());
        self.timer = Some(arm(self.generation, delay));
        Some(deadline)
    }

    /// 触发的定时器是否仍然有效。
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        !self.terminated && generation == self.generation
    }

    /// 撤销定时器，幂等。
    pub(crate) fn terminate(&mut self) {
        self.terminated = true;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
