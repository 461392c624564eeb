//! 用量统计：请求数、token、费用（原子计数，可跨并发运行共享）

use std::sync::atomic::{AtomicU64, Ordering};

use crate::oracle::UsageStats;

const MICROS_PER_USD: f64 = 1_000_000.0;

/// 只增不减的用量计数器；费用以微美元存储以便原子累加
#[derive(Debug, Default)]
pub struct UsageTracker {
    requests: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    cost_micros: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累加一次（或一批）调用的用量
    pub fn absorb(&self, delta: &UsageStats) {
        let micros = if delta.cost_usd.is_finite() && delta.cost_usd > 0.0 {
            (delta.cost_usd * MICROS_PER_USD).round() as u64
        } else {
            0
        };
        self.requests.fetch_add(delta.requests, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(delta.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(delta.completion_tokens, Ordering::Relaxed);
        self.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageStats {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        UsageStats {
            requests: self.requests.load(Ordering::Relaxed),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd: self.cost_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_USD,
        }
    }
}

impl UsageStats {
    /// 单次调用的用量
    pub fn single_call(prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) -> Self {
        UsageStats {
            requests: 1,
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd: if cost_usd.is_finite() { cost_usd.max(0.0) } else { 0.0 },
        }
    }

    /// 平均每次调用费用；尚无调用时返回 None
    pub fn average_call_cost(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.cost_usd / self.requests as f64)
    }
}
