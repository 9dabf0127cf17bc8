use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodWaitPolicy {
    pub max_retries: usize,
    pub max_total_wait: Duration,
}

impl Default for FloodWaitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_total_wait: Duration::from_secs(3600),
        }
    }
}

impl FloodWaitPolicy {
    pub fn budget(&self) -> FloodWaitBudget {
        FloodWaitBudget {
            policy: *self,
            retries: 0,
            waited: Duration::ZERO,
        }
    }
}

/// 单条消息的限流预算，重试次数与累计等待任一超限即放弃
#[derive(Debug, Clone)]
pub struct FloodWaitBudget {
    policy: FloodWaitPolicy,
    retries: usize,
    waited: Duration,
}

impl FloodWaitBudget {
    /// 返回本次应等待的时长；预算耗尽时返回 None
    pub fn next_wait(&mut self, seconds: u64) -> Option<Duration> {
        let wait = Duration::from_secs(seconds);
        if self.retries >= self.policy.max_retries {
            return None;
        }
        if self.waited + wait > self.policy.max_total_wait {
            return None;
        }
        self.retries += 1;
        self.waited += wait;
        Some(wait)
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn max_retries(&self) -> usize {
        self.policy.max_retries
    }
}
