//! Per-account exponential backoff
//!
//! Failures freeze an account for `base * 2^n` (capped), where `n` is the
//! number of consecutive failures before this one. Frozen accounts are kept
//! in a `FreezeSchedule` so callers can sleep until the next one thaws
//! instead of polling.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::AccountId;

/// Backoff timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 86_400,
        }
    }
}

impl BackoffPolicy {
    /// Freeze length after `prior_failures` consecutive failures
    pub fn delay_secs(&self, prior_failures: u32) -> u64 {
        let factor = 1u64.checked_shl(prior_failures).unwrap_or(u64::MAX);
        self.base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs)
    }

    /// State after a failed check at `now`
    pub fn on_failure(&self, state: &BackoffState, now: i64) -> BackoffState {
        let delay = self.delay_secs(state.failure_count) as i64;
        BackoffState {
            failure_count: state.failure_count.saturating_add(1),
            frozen_until: (now + delay).max(state.frozen_until),
        }
    }

    /// State after a successful check
    pub fn on_success(&self) -> BackoffState {
        BackoffState::default()
    }
}

/// Failure bookkeeping persisted per account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    pub failure_count: u32,
    /// Unix seconds; 0 when not frozen
    pub frozen_until: i64,
}

impl BackoffState {
    pub fn is_frozen(&self, now: i64) -> bool {
        now < self.frozen_until
    }

    /// Seconds left until the account thaws
    pub fn remaining(&self, now: i64) -> Duration {
        Duration::from_secs((self.frozen_until - now).max(0) as u64)
    }
}

/// Min-heap of frozen accounts ordered by thaw time
#[derive(Debug, Default)]
pub struct FreezeSchedule {
    heap: BinaryHeap<Reverse<(i64, AccountId)>>,
}

impl FreezeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, account_id: AccountId, frozen_until: i64) {
        self.heap.push(Reverse((frozen_until, account_id)));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Earliest thaw time
    pub fn next_thaw(&self) -> Option<i64> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every account thawed at `now`
    pub fn pop_due(&mut self, now: i64) -> Vec<AccountId> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, id))) = self.heap.pop() {
                due.push(id);
            }
        }
        due
    }

    /// Sleep until the earliest entry thaws, then return every due account
    ///
    /// Returns an empty list immediately when nothing is scheduled.
    pub async fn wait_due(&mut self) -> Vec<AccountId> {
        let Some(at) = self.next_thaw() else {
            return Vec::new();
        };
        let now = chrono::Utc::now().timestamp();
        if at > now {
            let wait = Duration::from_secs((at - now) as u64);
            tokio::time::sleep_until(tokio::time::Instant::now() + wait).await;
        }
        self.pop_due(chrono::Utc::now().timestamp().max(at))
    }
}
