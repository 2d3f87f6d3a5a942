use crate::registry::QueuedTask;
use hook_core::EntityResolver;
use hook_types::{EntityType, EventContext, Record, RecordId};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, error};

/// Arguments a queued task receives. Only serializable identifiers travel;
/// the task resolves the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub instance_id: RecordId,
    pub app_label: String,
    pub model_name: String,
    pub context: EventContext,
}

impl TaskPayload {
    pub fn entity(&self) -> EntityType {
        EntityType::new(&self.app_label, &self.model_name)
    }

    /// Loads the record the payload points at.
    pub fn resolve(&self, resolver: &dyn EntityResolver) -> anyhow::Result<Record> {
        Ok(resolver.resolve(&self.entity(), self.instance_id)?)
    }

    pub fn created(&self) -> bool {
        hook_types::event::was_created(&self.context)
    }
}

/// Asynchronous hand-off for queued-task actions. Fire-and-forget: an `Ok`
/// only means the task was accepted.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, reference: &str, task: QueuedTask, payload: TaskPayload) -> anyhow::Result<()>;
}

/// Runs tasks on the tokio blocking pool.
pub struct TokioTaskQueue {
    handle: Handle,
}

impl TokioTaskQueue {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running in.
    pub fn current() -> anyhow::Result<Self> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl TaskQueue for TokioTaskQueue {
    fn enqueue(&self, reference: &str, task: QueuedTask, payload: TaskPayload) -> anyhow::Result<()> {
        let message = serde_json::to_string(&payload)?;
        debug!(task = %reference, payload = %message, "Task enqueued");

        let reference = reference.to_string();
        self.handle.spawn_blocking(move || {
            if let Err(e) = task(&payload) {
                error!(task = %reference, error = %e, "Queued task failed");
            }
        });
        Ok(())
    }
}
