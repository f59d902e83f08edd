use serde::{Deserialize, Serialize};

/// Whole-transaction retry behaviour on write conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first run included.
    pub max_attempts: usize,
    /// Base duration in milliseconds for backoff calculation.
    pub base_backoff_ms: u64,
    /// Maximum duration in milliseconds for backoff.
    pub max_backoff_ms: u64,
    /// Spread each delay over its upper half so transactions that collided
    /// once do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff_ms: 1,
            max_backoff_ms: 50,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Exponential backoff before attempt `attempt + 1`, capped at
    /// `max_backoff_ms`.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let base = self.base_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        backoff
    }

    /// [`backoff_ms`](Self::backoff_ms) spread by `salt` when jitter is on.
    pub fn jittered_backoff_ms(&self, attempt: usize, salt: u64) -> u64 {
        let backoff = self.backoff_ms(attempt);
        if !self.jitter {
            return backoff;
        }
        let half = backoff / 2;
        let mixed = salt.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32;
        backoff - half + mixed % (half + 1)
    }
}

/// Transaction manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Number handed to the first transaction
    pub first_number: u64,

    /// Conflict retry policy for `with_transaction`
    pub retry: RetryPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            first_number: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume numbering after the last transaction known to storage
    pub fn starting_after(mut self, last_number: u64) -> Self {
        self.first_number = last_number + 1;
        self
    }

    /// Set maximum attempts per transaction
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Set backoff bounds in milliseconds
    pub fn backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.retry.base_backoff_ms = base;
        self.retry.max_backoff_ms = max;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
