use crate::error::{Result, RuleError};
use crate::queue::TaskPayload;
use hook_types::{EventContext, Record};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Called with the changed record and the merged context.
pub type NamedFunction =
    Arc<dyn Fn(&mut Record, &EventContext) -> anyhow::Result<()> + Send + Sync>;

/// Called with a serializable payload; resolves its own record.
pub type QueuedTask = Arc<dyn Fn(&TaskPayload) -> anyhow::Result<()> + Send + Sync>;

/// Named callables that function and task actions refer to by dotted path.
/// Populated at startup.
#[derive(Default)]
pub struct CallableRegistry {
    functions: RwLock<HashMap<String, NamedFunction>>,
    tasks: RwLock<HashMap<String, QueuedTask>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function<F>(&self, path: &str, function: F) -> Result<()>
    where
        F: Fn(&mut Record, &EventContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        validate_path(path)?;
        self.functions
            .write()?
            .insert(path.to_string(), Arc::new(function));
        debug!(path = %path, "Function registered");
        Ok(())
    }

    pub fn register_task<F>(&self, path: &str, task: F) -> Result<()>
    where
        F: Fn(&TaskPayload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        validate_path(path)?;
        self.tasks.write()?.insert(path.to_string(), Arc::new(task));
        debug!(path = %path, "Task registered");
        Ok(())
    }

    pub fn function(&self, path: &str) -> Option<NamedFunction> {
        match self.functions.read() {
            Ok(functions) => functions.get(path.trim()).cloned(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in function: {}", e);
                None
            }
        }
    }

    pub fn task(&self, path: &str) -> Option<QueuedTask> {
        match self.tasks.read() {
            Ok(tasks) => tasks.get(path.trim()).cloned(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in task: {}", e);
                None
            }
        }
    }

    pub fn function_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = match self.functions.read() {
            Ok(functions) => functions.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        paths.sort();
        paths
    }

    pub fn task_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = match self.tasks.read() {
            Ok(tasks) => tasks.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        paths.sort();
        paths
    }
}

/// `module.name` style: at least two identifier segments.
pub fn is_dotted_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        })
}

fn validate_path(path: &str) -> Result<()> {
    if is_dotted_path(path) {
        Ok(())
    } else {
        Err(RuleError::InvalidDefinition(format!(
            "{:?} is not a dotted reference",
            path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_paths() {
        assert!(is_dotted_path("app.tasks.notify"));
        assert!(is_dotted_path("_private.fn_2"));
        assert!(!is_dotted_path("notify"));
        assert!(!is_dotted_path("app..notify"));
        assert!(!is_dotted_path("app.2notify"));
        assert!(!is_dotted_path("app.tasks.notify()"));
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = CallableRegistry::new();
        registry
            .register_function("app.functions.touch", |record: &mut Record, _ctx: &EventContext| {
                record.set("touched", true);
                Ok(())
            })
            .unwrap();
        registry
            .register_task("app.tasks.noop", |_payload: &TaskPayload| Ok(()))
            .unwrap();

        assert!(registry.function("app.functions.touch").is_some());
        assert!(registry.function("app.functions.missing").is_none());
        assert!(registry.task("app.tasks.noop").is_some());
        assert!(registry.task("app.functions.touch").is_none());
        assert_eq!(registry.function_paths(), vec!["app.functions.touch"]);
        assert_eq!(registry.task_paths(), vec!["app.tasks.noop"]);
    }

    #[test]
    fn test_rejects_bad_path() {
        let registry = CallableRegistry::new();
        let err = registry
            .register_task("noop", |_payload: &TaskPayload| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RuleError::InvalidDefinition(_)));
    }
}
