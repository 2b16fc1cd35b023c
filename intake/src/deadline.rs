use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::Assignment;
use crate::clock::{Clock, SystemClock};

/// A deadline instant and the credit multiplier for work accepted before it.
///
/// `scale` is 1.0 for on-time work and below 1.0 for late tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadlineTier {
    pub due: DateTime<Utc>,
    pub scale: f64,
}

impl DeadlineTier {
    pub fn new(due: DateTime<Utc>, scale: f64) -> Self {
        Self { due, scale }
    }

    /// A tier is still open at exactly its deadline instant.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.due
    }
}

/// Earliest tier in an ascending schedule that is still open at `now`.
pub fn next_tier(tiers: &[DeadlineTier], now: DateTime<Utc>) -> Option<DeadlineTier> {
    tiers.iter().find(|t| t.is_open_at(now)).copied()
}

/// Answers "which tier applies if this is accepted right now".
///
/// Holds no state besides the clock, so every call sees the current schedule
/// position; callers must resolve once per submission and keep the answer.
#[derive(Clone)]
pub struct DeadlineResolver {
    clock: Arc<dyn Clock>,
}

impl DeadlineResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn resolve(&self, assignment: &Assignment) -> Option<DeadlineTier> {
        next_tier(assignment.deadlines(), self.clock.now())
    }
}

impl Default for DeadlineResolver {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 23, 59, 59).unwrap()
    }

    fn two_tier_assignment() -> Assignment {
        Assignment::new(
            "uuid-1",
            "linked-list",
            "Linked List",
            vec![DeadlineTier::new(t(8), 0.8), DeadlineTier::new(t(1), 1.0)],
            vec!["java".into(), "python".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_resolves_next_unexpired_tier() {
        let hw = two_tier_assignment();
        let clock = Arc::new(ManualClock::new(t(1) - Duration::days(3)));
        let resolver = DeadlineResolver::new(clock.clone());

        assert_eq!(resolver.resolve(&hw), Some(DeadlineTier::new(t(1), 1.0)));

        clock.set(t(1) + Duration::seconds(1));
        assert_eq!(resolver.resolve(&hw), Some(DeadlineTier::new(t(8), 0.8)));

        clock.set(t(8) + Duration::seconds(1));
        assert_eq!(resolver.resolve(&hw), None);
    }

    #[test]
    fn test_deadline_instant_is_inclusive() {
        let hw = two_tier_assignment();
        let resolver = DeadlineResolver::new(Arc::new(ManualClock::new(t(1))));
        assert_eq!(resolver.resolve(&hw).map(|t| t.scale), Some(1.0));
    }

    #[test]
    fn test_empty_schedule_is_closed() {
        let hw = Assignment::new("uuid-2", "empty", "Empty", vec![], vec!["python".into()]).unwrap();
        let resolver = DeadlineResolver::new(Arc::new(ManualClock::new(t(1))));
        assert_eq!(resolver.resolve(&hw), None);
    }
}
