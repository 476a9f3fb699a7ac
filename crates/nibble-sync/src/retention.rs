//! How long acknowledged deltas stay in the local outbox.
//!
//! Unsent deltas are never purged. Purging acknowledged ones only loses local
//! history: the authority keeps its own copy and other devices pull from it.

use std::time::Duration;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    purge_acked_after: Option<Duration>,
}

impl RetentionPolicy {
    pub fn keep_forever() -> Self {
        Self::default()
    }

    pub fn purge_after(age: Duration) -> Self {
        Self {
            purge_acked_after: Some(age),
        }
    }

    /// `0` keeps everything.
    pub fn from_days(days: u32) -> Self {
        if days == 0 {
            Self::keep_forever()
        } else {
            Self::purge_after(Duration::from_millis(days as u64 * DAY_MS as u64))
        }
    }

    /// Deltas acknowledged before the returned instant may be deleted.
    pub fn cutoff(&self, now_ms: i64) -> Option<i64> {
        let age = self.purge_acked_after?;
        let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
        Some(now_ms.saturating_sub(age_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_forever_has_no_cutoff() {
        assert_eq!(RetentionPolicy::keep_forever().cutoff(1_000), None);
        assert_eq!(RetentionPolicy::from_days(0), RetentionPolicy::keep_forever());
    }

    #[test]
    fn test_cutoff_subtracts_age() {
        let policy = RetentionPolicy::from_days(2);
        assert_eq!(policy.cutoff(10 * DAY_MS), Some(8 * DAY_MS));
    }
}
