//! Queue Protocol (4.E): a FIFO with per-item visibility delay, ack, and
//! unacked-requeue. This module defines the trait the Execution Service
//! dispatches through and an in-memory reference implementation (the real
//! backend is out of scope, §1).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// `taskType` optionally suffixed by `:<domain>` (§6).
pub const DOMAIN_SEP: char = ':';

#[must_use]
pub fn queue_name(task_type: &str, domain: Option<&str>) -> String {
    match domain {
        Some(d) if !d.is_empty() => format!("{task_type}{DOMAIN_SEP}{d}"),
        _ => task_type.to_string(),
    }
}

#[async_trait]
pub trait QueueProvider: Send + Sync + std::fmt::Debug {
    /// Blocks up to `timeout` or until `count` items are visible, whichever
    /// comes first; returns fewer than `count` on timeout. Dequeued items
    /// become unacked with a default-visibility timer.
    async fn pop(&self, queue: &str, count: usize, timeout: Duration) -> Vec<String>;

    /// Append; visible after `delay`.
    async fn push(&self, queue: &str, id: &str, delay: ChronoDuration);

    /// Idempotent insert; `false` if `id` is already present (visible or
    /// unacked) in `queue`.
    async fn push_if_not_exists(&self, queue: &str, id: &str, delay: ChronoDuration) -> bool;

    /// Remove from unacked; `false` if unknown.
    async fn ack(&self, queue: &str, id: &str) -> bool;

    /// Delete from both the visible and unacked sets.
    async fn remove(&self, queue: &str, id: &str);

    async fn exists(&self, queue: &str, id: &str) -> bool;

    async fn get_size(&self, queue: &str) -> usize;

    async fn queues_detail(&self) -> HashMap<String, usize>;
}

#[derive(Debug, Clone)]
struct VisibleItem {
    id: String,
    visible_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<VisibleItem>,
    unacked: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    default_visibility: ChronoDuration,
    poll_interval: Duration,
}

impl InMemoryQueue {
    #[must_use]
    pub fn new(default_visibility: ChronoDuration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            default_visibility,
            poll_interval: Duration::from_millis(25),
        }
    }

    fn with_queue<R>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(queues.entry(queue.to_string()).or_default())
    }

    fn present(state: &QueueState, id: &str) -> bool {
        state.unacked.contains_key(id) || state.visible.iter().any(|i| i.id == id)
    }

    fn drain_ready(state: &mut QueueState, count: usize, default_visibility: ChronoDuration) -> Vec<String> {
        let now = Utc::now();
        let mut drained = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(item) = state.visible.pop_front() {
            if drained.len() < count && item.visible_at <= now {
                state.unacked.insert(item.id.clone(), now + default_visibility);
                drained.push(item.id);
            } else {
                remaining.push_back(item);
            }
        }
        state.visible = remaining;
        drained
    }
}

#[async_trait]
impl QueueProvider for InMemoryQueue {
    async fn pop(&self, queue: &str, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let drained =
                self.with_queue(queue, |s| Self::drain_ready(s, count, self.default_visibility));
            if !drained.is_empty() || Instant::now() >= deadline {
                return drained;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.poll_interval.min(remaining)).await;
        }
    }

    async fn push(&self, queue: &str, id: &str, delay: ChronoDuration) {
        self.with_queue(queue, |s| {
            s.visible.push_back(VisibleItem {
                id: id.to_string(),
                visible_at: Utc::now() + delay,
            });
        });
    }

    async fn push_if_not_exists(&self, queue: &str, id: &str, delay: ChronoDuration) -> bool {
        self.with_queue(queue, |s| {
            if Self::present(s, id) {
                return false;
            }
            s.visible.push_back(VisibleItem {
                id: id.to_string(),
                visible_at: Utc::now() + delay,
            });
            true
        })
    }

    async fn ack(&self, queue: &str, id: &str) -> bool {
        self.with_queue(queue, |s| s.unacked.remove(id).is_some())
    }

    async fn remove(&self, queue: &str, id: &str) {
        self.with_queue(queue, |s| {
            s.unacked.remove(id);
            s.visible.retain(|i| i.id != id);
        });
    }

    async fn exists(&self, queue: &str, id: &str) -> bool {
        self.with_queue(queue, |s| Self::present(s, id))
    }

    async fn get_size(&self, queue: &str) -> usize {
        self.with_queue(queue, |s| s.visible.len() + s.unacked.len())
    }

    async fn queues_detail(&self) -> HashMap<String, usize> {
        let queues = self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        queues
            .iter()
            .map(|(k, v)| (k.clone(), v.visible.len() + v.unacked.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> InMemoryQueue {
        InMemoryQueue::new(ChronoDuration::seconds(3))
    }

    #[tokio::test]
    async fn push_if_not_exists_is_idempotent() {
        let q = queue();
        assert!(q.push_if_not_exists("t", "1", ChronoDuration::zero()).await);
        assert!(!q.push_if_not_exists("t", "1", ChronoDuration::zero()).await);
        assert_eq!(q.get_size("t").await, 1);
    }

    #[tokio::test]
    async fn pop_respects_visibility_delay() {
        let q = queue();
        q.push("t", "1", ChronoDuration::seconds(10)).await;
        let popped = q.pop("t", 1, Duration::from_millis(50)).await;
        assert!(popped.is_empty(), "item delayed 10s should not be visible yet");
    }

    #[tokio::test]
    async fn pop_returns_within_timeout_bound() {
        let q = queue();
        let start = Instant::now();
        let popped = q.pop("empty", 1, Duration::from_millis(100)).await;
        assert!(popped.is_empty());
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn ack_removes_unacked_item() {
        let q = queue();
        q.push("t", "1", ChronoDuration::zero()).await;
        let popped = q.pop("t", 1, Duration::from_millis(50)).await;
        assert_eq!(popped, vec!["1".to_string()]);
        assert!(q.ack("t", "1").await);
        assert!(!q.ack("t", "1").await, "second ack on same id returns false");
        assert_eq!(q.get_size("t").await, 0);
    }

    #[tokio::test]
    async fn queue_name_appends_domain_suffix() {
        assert_eq!(queue_name("simple_task", None), "simple_task");
        assert_eq!(queue_name("simple_task", Some("prod")), "simple_task:prod");
    }
}
