// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Freshness and eviction policy for cached reference lookups
//!
//! - Fresh for `stale_time` after a fetch; served without a request
//! - Stale afterwards; the next access refetches
//! - Evicted after `gc_time` without any access

use crate::CoreError;
use std::time::Duration;

/// Default freshness window
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);

/// Default idle time before eviction
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(300);

/// Default maximum entries per entity kind
pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub max_capacity: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            gc_time: DEFAULT_GC_TIME,
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

impl CachePolicy {
    pub fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self {
            stale_time,
            gc_time,
            ..Default::default()
        }
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Whether an entry fetched `age` ago must be refetched
    pub fn is_stale(&self, age: Duration) -> bool {
        age >= self.stale_time
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.gc_time.is_zero() {
            return Err(CoreError::InvalidPolicy(
                "gc_time must be greater than zero".to_string(),
            ));
        }
        if self.stale_time > self.gc_time {
            return Err(CoreError::InvalidPolicy(format!(
                "stale_time ({:?}) exceeds gc_time ({:?})",
                self.stale_time, self.gc_time
            )));
        }
        if self.max_capacity == 0 {
            return Err(CoreError::InvalidPolicy(
                "max_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        assert_eq!(policy.stale_time, Duration::from_secs(60));
        assert_eq!(policy.gc_time, Duration::from_secs(300));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_staleness() {
        let policy = CachePolicy::new(Duration::from_secs(30), Duration::from_secs(60));
        assert!(!policy.is_stale(Duration::from_secs(29)));
        assert!(policy.is_stale(Duration::from_secs(30)));
    }

    #[test]
    fn test_validate_rejects_inverted_windows() {
        let policy = CachePolicy::new(Duration::from_secs(600), Duration::from_secs(60));
        assert!(policy.validate().is_err());

        let policy = CachePolicy::new(Duration::ZERO, Duration::ZERO);
        assert!(policy.validate().is_err());
    }
}
