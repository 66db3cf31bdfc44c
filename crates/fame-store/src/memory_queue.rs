//! In-memory `Queue`, `VecDeque`-per-name behind a single `Mutex` — the
//! same "good enough for tests, not for two processes" tradeoff as
//! `MemoryStore`.

use fame_core::FameResult;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::queue::{Queue, Task, TaskHandle};

struct Claimed {
    queue_name: String,
    task: Task,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Task>>,
    claimed: HashMap<i64, Claimed>,
}

pub struct MemoryQueue {
    inner: Mutex<Inner>,
    next_id: AtomicI64,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait::async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, queue_name: &str, task: Task) -> FameResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .push_back(task);
        Ok(())
    }

    async fn pull(&self, queue_name: &str, _worker_id: &str) -> FameResult<Option<(TaskHandle, Task)>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(task) = inner
            .queues
            .get_mut(queue_name)
            .and_then(|q| q.pop_front())
        else {
            return Ok(None);
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        inner.claimed.insert(
            id,
            Claimed {
                queue_name: queue_name.to_string(),
                task: task.clone(),
            },
        );
        Ok(Some((TaskHandle(id), task)))
    }

    async fn ack(&self, handle: TaskHandle) -> FameResult<()> {
        self.inner.lock().unwrap().claimed.remove(&handle.0);
        Ok(())
    }

    async fn depth(&self, queue_name: &str) -> FameResult<usize> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .queues
            .get(queue_name)
            .map(|q| q.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fame_core::AnalysisId;

    fn task() -> Task {
        Task {
            analysis_id: AnalysisId::new(),
            module_name: "strings".into(),
        }
    }

    #[tokio::test]
    async fn publish_then_pull_fifo_order() {
        let q = MemoryQueue::new();
        q.publish("unix", task()).await.unwrap();
        let second = task();
        q.publish("unix", second.clone()).await.unwrap();
        let (_h, first_out) = q.pull("unix", "w1").await.unwrap().unwrap();
        assert_ne!(first_out.analysis_id, second.analysis_id);
        let (_h2, second_out) = q.pull("unix", "w1").await.unwrap().unwrap();
        assert_eq!(second_out.analysis_id, second.analysis_id);
    }

    #[tokio::test]
    async fn pull_empty_queue_returns_none() {
        let q = MemoryQueue::new();
        assert!(q.pull("unix", "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_removes_claim_and_depth_tracks_unclaimed() {
        let q = MemoryQueue::new();
        q.publish("unix", task()).await.unwrap();
        assert_eq!(q.depth("unix").await.unwrap(), 1);
        let (handle, _) = q.pull("unix", "w1").await.unwrap().unwrap();
        assert_eq!(q.depth("unix").await.unwrap(), 0);
        q.ack(handle).await.unwrap();
        q.ack(handle).await.unwrap();
    }
}
