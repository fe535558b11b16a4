//! Processing budgets
//!
//! One invocation has a fixed wall-clock budget (and optionally a quota on
//! downloaded bytes) that is shared by every topic it processes. The
//! [`BudgetAllocator`] hands each topic a slice and, once the topic is done,
//! spreads whatever the topic left over (or overran) across the topics that
//! are still waiting.
//!
//! Loops never get preempted. They poll a [`BudgetProbe`] and stop early.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time reserved for discovery and ticket filing before topics get a share
pub const FIXED_OVERHEAD: Duration = Duration::from_secs(30);

/// Total budget when none is configured
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(540);

/// Polled by every loop over characters, objects, chunks and blobs
pub trait BudgetProbe {
    /// True once the loop should stop
    fn exhausted(&self) -> bool;
}

/// A probe that never runs out
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl BudgetProbe for Unbounded {
    fn exhausted(&self) -> bool {
        false
    }
}

/// Wall-clock allotment measured from a start instant
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    allotment: Duration,
}

impl Deadline {
    /// Start the clock now
    pub fn starting_now(allotment: Duration) -> Self {
        Self {
            start: Instant::now(),
            allotment,
        }
    }

    pub fn allotment(&self) -> Duration {
        self.allotment
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left, zero once passed
    pub fn remaining(&self) -> Duration {
        self.allotment.saturating_sub(self.elapsed())
    }
}

impl BudgetProbe for Deadline {
    fn exhausted(&self) -> bool {
        self.elapsed() >= self.allotment
    }
}

/// Budget of a single topic: a deadline plus an optional byte quota
#[derive(Debug)]
pub struct TopicBudget {
    deadline: Deadline,
    byte_limit: Option<u64>,
    bytes_used: AtomicU64,
}

impl TopicBudget {
    pub fn new(allotment: Duration, byte_limit: Option<u64>) -> Self {
        Self {
            deadline: Deadline::starting_now(allotment),
            byte_limit,
            bytes_used: AtomicU64::new(0),
        }
    }

    /// Budget for local checks that should never stop early
    pub fn unbounded() -> Self {
        Self::new(Duration::MAX, None)
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.deadline.elapsed()
    }

    pub fn byte_limit(&self) -> Option<u64> {
        self.byte_limit
    }

    /// Account for downloaded bytes
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }
}

impl BudgetProbe for TopicBudget {
    fn exhausted(&self) -> bool {
        if self.deadline.exhausted() {
            return true;
        }
        self.byte_limit
            .map_or(false, |limit| self.bytes_used() >= limit)
    }
}

/// Current per-topic share
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopicAllotment {
    pub seconds: f64,
    pub bytes: Option<f64>,
}

/// Divides the invocation budget fairly across a shrinking set of topics
///
/// Overruns are not clamped: a slow topic makes the allotments of the
/// remaining topics smaller, possibly below zero, in which case those
/// topics get a zero-length deadline and stop at their first poll.
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    per_topic_seconds: f64,
    per_topic_bytes: Option<f64>,
    remaining_topics: usize,
}

impl BudgetAllocator {
    /// Split `total` (minus [`FIXED_OVERHEAD`]) across `topic_count` topics
    pub fn new(total: Duration, topic_count: usize) -> Self {
        Self {
            per_topic_seconds: initial_budget(total.as_secs_f64(), topic_count),
            per_topic_bytes: None,
            remaining_topics: topic_count,
        }
    }

    /// Also split a quota of downloaded bytes across the topics
    pub fn with_byte_quota(mut self, total_bytes: Option<u64>) -> Self {
        self.per_topic_bytes = total_bytes.map(|total| {
            if self.remaining_topics == 0 {
                total as f64
            } else {
                total as f64 / self.remaining_topics as f64
            }
        });
        self
    }

    pub fn remaining_topics(&self) -> usize {
        self.remaining_topics
    }

    pub fn current(&self) -> TopicAllotment {
        TopicAllotment {
            seconds: self.per_topic_seconds,
            bytes: self.per_topic_bytes,
        }
    }

    /// Start the clock on the next topic's share
    pub fn topic_budget(&self) -> TopicBudget {
        let seconds = if self.per_topic_seconds.is_finite() {
            self.per_topic_seconds.max(0.0)
        } else {
            0.0
        };
        let bytes = self.per_topic_bytes.map(|b| b.max(0.0) as u64);
        TopicBudget::new(Duration::from_secs_f64(seconds), bytes)
    }

    /// Record a finished topic and redistribute its leftover
    ///
    /// Returns the new per-topic seconds. The last topic does not
    /// redistribute because nobody is left to receive the difference.
    pub fn update(&mut self, spent: Duration, bytes_used: u64) -> f64 {
        if self.remaining_topics <= 1 {
            self.remaining_topics = 0;
            return self.per_topic_seconds;
        }
        self.remaining_topics -= 1;
        let share = self.remaining_topics as f64;

        let leftover = self.per_topic_seconds - spent.as_secs_f64();
        self.per_topic_seconds += leftover / share;

        if let Some(bytes) = self.per_topic_bytes.as_mut() {
            let leftover_bytes = *bytes - bytes_used as f64;
            *bytes += leftover_bytes / share;
        }

        tracing::debug!(
            remaining_topics = self.remaining_topics,
            per_topic_seconds = self.per_topic_seconds,
            leftover_seconds = leftover,
            "Redistributed topic budget"
        );

        self.per_topic_seconds
    }
}

/// Seconds each topic gets before any redistribution
pub fn initial_budget(total_seconds: f64, topic_count: usize) -> f64 {
    let usable = (total_seconds - FIXED_OVERHEAD.as_secs_f64()).max(0.0);
    if topic_count == 0 {
        usable
    } else {
        usable / topic_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_allotment() {
        // 540s total leaves 510s once the overhead is reserved
        let allocator = BudgetAllocator::new(Duration::from_secs(540), 3);
        assert_eq!(allocator.current().seconds, 170.0);
        assert_eq!(allocator.remaining_topics(), 3);
    }

    #[test]
    fn test_leftover_is_redistributed() {
        let mut allocator = BudgetAllocator::new(Duration::from_secs(540), 3);

        let next = allocator.update(Duration::from_secs(100), 0);
        assert_eq!(next, 205.0);
        assert_eq!(allocator.remaining_topics(), 2);

        // Topic 2 uses exactly its share, nothing moves
        let next = allocator.update(Duration::from_secs(205), 0);
        assert_eq!(next, 205.0);
        assert_eq!(allocator.remaining_topics(), 1);
    }

    #[test]
    fn test_overrun_shrinks_later_allotments() {
        let mut allocator = BudgetAllocator::new(Duration::from_secs(540), 3);
        let next = allocator.update(Duration::from_secs(230), 0);
        assert_eq!(next, 140.0);
    }

    #[test]
    fn test_last_topic_does_not_redistribute() {
        let mut allocator = BudgetAllocator::new(Duration::from_secs(130), 1);
        assert_eq!(allocator.current().seconds, 100.0);

        let next = allocator.update(Duration::from_secs(10), 0);
        assert_eq!(next, 100.0);
        assert_eq!(allocator.remaining_topics(), 0);

        // Further updates stay harmless
        let next = allocator.update(Duration::from_secs(10), 0);
        assert_eq!(next, 100.0);
    }

    #[test]
    fn test_initial_budget_edge_cases() {
        assert_eq!(initial_budget(20.0, 2), 0.0);
        assert_eq!(initial_budget(90.0, 0), 60.0);
    }

    #[test]
    fn test_byte_quota_redistribution() {
        let mut allocator =
            BudgetAllocator::new(Duration::from_secs(540), 2).with_byte_quota(Some(1_000));
        assert_eq!(allocator.current().bytes, Some(500.0));

        allocator.update(Duration::from_secs(10), 200);
        assert_eq!(allocator.current().bytes, Some(800.0));
    }

    #[test]
    fn test_negative_allotment_gives_zero_deadline() {
        let mut allocator = BudgetAllocator::new(Duration::from_secs(60), 2);
        allocator.update(Duration::from_secs(100), 0);
        assert!(allocator.current().seconds < 0.0);

        let budget = allocator.topic_budget();
        assert_eq!(budget.deadline().allotment(), Duration::ZERO);
        assert!(budget.exhausted());
    }

    #[test]
    fn test_topic_budget_byte_limit() {
        let budget = TopicBudget::new(Duration::from_secs(60), Some(100));
        assert!(!budget.exhausted());
        budget.record_bytes(60);
        assert!(!budget.exhausted());
        budget.record_bytes(40);
        assert!(budget.exhausted());
        assert_eq!(budget.bytes_used(), 100);
    }

    #[test]
    fn test_unbounded_budget() {
        let budget = TopicBudget::unbounded();
        budget.record_bytes(u32::MAX as u64);
        assert!(!budget.exhausted());
        assert!(!Unbounded.exhausted());
    }
}
