use crate::error::{Result, RuleError};
use crate::model::{ActionDefinition, ActionKind};
use crate::queue::{TaskPayload, TaskQueue};
use crate::registry::CallableRegistry;
use hook_config::ActionsConfig;
use hook_script::ScriptEngine;
use hook_types::event::merge;
use hook_types::{EventContext, Record, SIGNAL_KEY};
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

/// Process-wide action settings, read once per execution.
pub type SharedActionsConfig = Arc<RwLock<ActionsConfig>>;

/// Runs an action definition against a record.
pub struct ActionExecutor {
    script_engine: Arc<ScriptEngine>,
    registry: Arc<CallableRegistry>,
    queue: Option<Arc<dyn TaskQueue>>,
    settings: SharedActionsConfig,
}

impl ActionExecutor {
    pub fn new(
        script_engine: Arc<ScriptEngine>,
        registry: Arc<CallableRegistry>,
        queue: Option<Arc<dyn TaskQueue>>,
        settings: SharedActionsConfig,
    ) -> Self {
        Self {
            script_engine,
            registry,
            queue,
            settings,
        }
    }

    pub fn execute(
        &self,
        action: &ActionDefinition,
        record: &mut Record,
        context: &EventContext,
    ) -> Result<()> {
        debug!(action_id = action.id, kind = ?action.kind, record_id = record.id, "Executing action");

        match action.kind {
            ActionKind::InlineScript => Ok(self.script_engine.run_script(&action.body, record)?),
            ActionKind::NamedFunctionReference => self.call_function(action, record, context),
            ActionKind::QueuedTaskReference => self.submit_task(action, record, context),
        }
    }

    fn call_function(
        &self,
        action: &ActionDefinition,
        record: &mut Record,
        context: &EventContext,
    ) -> Result<()> {
        let reference = action.body.trim();
        let function = self
            .registry
            .function(reference)
            .ok_or_else(|| RuleError::ActionLookup {
                reference: reference.to_string(),
            })?;

        // Event context wins over the action's static context
        let merged = merge(&action.context, context);

        function(record, &merged).map_err(|e| {
            error!(action_id = action.id, function = %reference, error = %e, "Function action failed");
            RuleError::ActionExecution {
                reference: reference.to_string(),
                source: e,
            }
        })
    }

    fn submit_task(
        &self,
        action: &ActionDefinition,
        record: &Record,
        context: &EventContext,
    ) -> Result<()> {
        let reference = action.body.trim();
        let task = self
            .registry
            .task(reference)
            .ok_or_else(|| RuleError::ActionLookup {
                reference: reference.to_string(),
            })?;

        let mut event_context = context.clone();
        event_context.remove(SIGNAL_KEY);

        let payload = TaskPayload {
            instance_id: record.id,
            app_label: record.entity.app_label.clone(),
            model_name: record.entity.model_name.clone(),
            context: merge(&action.context, &event_context),
        };

        let use_async = self.use_async();
        let (mode, outcome) = if use_async {
            let outcome = match &self.queue {
                Some(queue) => queue.enqueue(reference, task, payload),
                None => Err(anyhow::anyhow!("no task queue configured")),
            };
            ("async", outcome)
        } else {
            ("sync", task(&payload))
        };

        outcome.map_err(|e| {
            error!(action_id = action.id, task = %reference, mode, error = %e, "Task action failed");
            RuleError::TaskSubmission {
                reference: reference.to_string(),
                mode,
                source: e,
            }
        })
    }

    fn use_async(&self) -> bool {
        match self.settings.read() {
            Ok(settings) => settings.celery_use_async,
            Err(e) => {
                tracing::error!("Failed to acquire read lock on action settings: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::QueuedTask;
    use hook_types::EntityType;
    use serde_json::json;
    use std::sync::Mutex;

    fn post() -> Record {
        let mut record = Record::new(
            EntityType::new("blog", "post"),
            json!({ "title": "Test", "body": "b" }).as_object().cloned().unwrap(),
        );
        record.id = 5;
        record
    }

    fn context(value: serde_json::Value) -> EventContext {
        value.as_object().cloned().unwrap()
    }

    fn executor(registry: Arc<CallableRegistry>, queue: Option<Arc<dyn TaskQueue>>, use_async: bool) -> ActionExecutor {
        ActionExecutor::new(
            Arc::new(ScriptEngine::new()),
            registry,
            queue,
            Arc::new(RwLock::new(ActionsConfig {
                celery_use_async: use_async,
            })),
        )
    }

    #[derive(Default)]
    struct RecordingQueue {
        submitted: Mutex<Vec<(String, TaskPayload)>>,
    }

    impl TaskQueue for RecordingQueue {
        fn enqueue(&self, reference: &str, _task: QueuedTask, payload: TaskPayload) -> anyhow::Result<()> {
            self.submitted.lock().unwrap().push((reference.to_string(), payload));
            Ok(())
        }
    }

    #[test]
    fn test_inline_script() {
        let exec = executor(Arc::new(CallableRegistry::new()), None, false);
        let action = ActionDefinition::inline_script("rename", r#"instance.title = "Changed by signal""#);
        let mut record = post();

        exec.execute(&action, &mut record, &EventContext::new()).unwrap();

        assert_eq!(record.get_str("title"), Some("Changed by signal"));
    }

    #[test]
    fn test_inline_script_error_is_unwrapped() {
        let exec = executor(Arc::new(CallableRegistry::new()), None, false);
        let action = ActionDefinition::inline_script("bad", "instance.missing += 1;");

        let err = exec.execute(&action, &mut post(), &EventContext::new()).unwrap_err();
        assert!(matches!(err, RuleError::Script(_)));
    }

    #[test]
    fn test_function_receives_merged_context() {
        let registry = Arc::new(CallableRegistry::new());
        let seen = Arc::new(Mutex::new(EventContext::new()));
        let sink = seen.clone();
        registry
            .register_function("blog.functions.capture", move |record: &mut Record, ctx: &EventContext| {
                record.set("body", "touched");
                *sink.lock().unwrap() = ctx.clone();
                Ok(())
            })
            .unwrap();

        let mut action = ActionDefinition::function("capture", "blog.functions.capture");
        action.context = context(json!({ "channel": "email", "created": "static" }));
        let exec = executor(registry, None, false);
        let mut record = post();

        exec.execute(
            &action,
            &mut record,
            &context(json!({ "created": true, "signal": "after_save" })),
        )
        .unwrap();

        let ctx = seen.lock().unwrap().clone();
        assert_eq!(ctx["channel"], "email");
        assert_eq!(ctx["created"], true);
        assert_eq!(ctx["signal"], "after_save");
        assert_eq!(record.get_str("body"), Some("touched"));
    }

    #[test]
    fn test_missing_function_is_lookup_error() {
        let exec = executor(Arc::new(CallableRegistry::new()), None, false);
        let action = ActionDefinition::function("missing", "blog.functions.missing");

        let err = exec.execute(&action, &mut post(), &EventContext::new()).unwrap_err();

        assert!(matches!(err, RuleError::ActionLookup { .. }));
        assert_eq!(err.to_string(), "blog.functions.missing: reference not found");
    }

    #[test]
    fn test_function_failure_is_wrapped() {
        let registry = Arc::new(CallableRegistry::new());
        registry
            .register_function("blog.functions.fail", |_r: &mut Record, _c: &EventContext| {
                Err(anyhow::Error::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )))
            })
            .unwrap();
        let exec = executor(registry, None, false);
        let action = ActionDefinition::function("fail", "blog.functions.fail");

        let err = exec.execute(&action, &mut post(), &EventContext::new()).unwrap_err();

        match err {
            RuleError::ActionExecution { reference, source } => {
                assert_eq!(reference, "blog.functions.fail");
                assert!(source.downcast_ref::<std::io::Error>().is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sync_task_strips_signal() {
        let registry = Arc::new(CallableRegistry::new());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        registry
            .register_task("blog.tasks.capture", move |payload: &TaskPayload| {
                *sink.lock().unwrap() = Some(payload.clone());
                Ok(())
            })
            .unwrap();
        let mut action = ActionDefinition::task("capture", "blog.tasks.capture");
        action.context = context(json!({ "priority": "high" }));
        let exec = executor(registry, None, false);

        exec.execute(
            &action,
            &mut post(),
            &context(json!({ "created": false, "signal": "after_save" })),
        )
        .unwrap();

        let payload = seen.lock().unwrap().clone().unwrap();
        assert_eq!(payload.instance_id, 5);
        assert_eq!(payload.app_label, "blog");
        assert_eq!(payload.model_name, "post");
        assert_eq!(payload.context["priority"], "high");
        assert_eq!(payload.context["created"], false);
        assert!(payload.context.get("signal").is_none());
    }

    #[test]
    fn test_async_task_goes_to_queue() {
        let registry = Arc::new(CallableRegistry::new());
        registry
            .register_task("blog.tasks.never_inline", |_p: &TaskPayload| {
                Err(anyhow::anyhow!("must not run inline"))
            })
            .unwrap();
        let queue = Arc::new(RecordingQueue::default());
        let exec = executor(registry, Some(queue.clone()), true);
        let action = ActionDefinition::task("queued", "blog.tasks.never_inline");

        exec.execute(&action, &mut post(), &EventContext::new()).unwrap();

        let submitted = queue.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, "blog.tasks.never_inline");
        assert_eq!(submitted[0].1.instance_id, 5);
    }

    #[test]
    fn test_async_without_queue_fails() {
        let registry = Arc::new(CallableRegistry::new());
        registry
            .register_task("blog.tasks.noop", |_p: &TaskPayload| Ok(()))
            .unwrap();
        let exec = executor(registry, None, true);
        let action = ActionDefinition::task("noop", "blog.tasks.noop");

        let err = exec.execute(&action, &mut post(), &EventContext::new()).unwrap_err();
        assert!(matches!(err, RuleError::TaskSubmission { mode: "async", .. }));
    }

    #[test]
    fn test_sync_task_failure_keeps_source() {
        let registry = Arc::new(CallableRegistry::new());
        registry
            .register_task("blog.tasks.fail", |_p: &TaskPayload| {
                Err(anyhow::Error::new(std::fmt::Error))
            })
            .unwrap();
        let exec = executor(registry, None, false);
        let action = ActionDefinition::task("fail", "blog.tasks.fail");

        let err = exec.execute(&action, &mut post(), &EventContext::new()).unwrap_err();

        assert!(err.to_string().starts_with("sync task blog.tasks.fail failed"));
        match err {
            RuleError::TaskSubmission { source, .. } => {
                assert!(source.downcast_ref::<std::fmt::Error>().is_some())
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_task_is_lookup_error() {
        let exec = executor(Arc::new(CallableRegistry::new()), None, false);
        let action = ActionDefinition::task("missing", "blog.tasks.missing");

        let err = exec.execute(&action, &mut post(), &EventContext::new()).unwrap_err();
        assert!(matches!(err, RuleError::ActionLookup { .. }));
    }
}
