//! Named-queue publish/pull bus (§6.1, §4.4). A task is "(analysis, module)
//! should run next" — the orchestrator publishes one every time
//! `Dispatcher::next_module` names a module to run, and a worker bound to
//! that module's queue (default `"unix"`, see `ModuleInfo::queue`) pulls it.
//!
//! Pull is a claim, not a pop: the row stays until `ack`, so a worker that
//! dies mid-task leaves it visible to whoever inspects `claimed_at` rather
//! than losing it silently.

use async_trait::async_trait;
use fame_core::{AnalysisId, FameResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub analysis_id: AnalysisId,
    pub module_name: String,
}

/// Opaque handle returned by `pull`, required by `ack`. Backends use it to
/// find the exact row claimed, rather than re-matching on `Task` contents
/// (two pending tasks can carry an identical `analysis_id`/`module_name`
/// pair, e.g. a module re-queued after `reschedule_all`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub i64);

#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueues `task` onto `queue_name`. Called once per module the
    /// dispatcher names, never batched, so ordering within a queue reflects
    /// dispatch order.
    async fn publish(&self, queue_name: &str, task: Task) -> FameResult<()>;

    /// Claims and returns the oldest unclaimed task on `queue_name`, or
    /// `None` if the queue is empty. `worker_id` is recorded for
    /// observability only — it plays no role in claim correctness.
    async fn pull(&self, queue_name: &str, worker_id: &str) -> FameResult<Option<(TaskHandle, Task)>>;

    /// Marks a claimed task as finished. Idempotent: acking twice, or
    /// acking a handle that was already dropped, is not an error.
    async fn ack(&self, handle: TaskHandle) -> FameResult<()>;

    /// Number of unclaimed tasks currently waiting on `queue_name`, used by
    /// the orchestrator to decide whether `reschedule_all` has drained.
    async fn depth(&self, queue_name: &str) -> FameResult<usize>;
}
