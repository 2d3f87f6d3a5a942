use hook_script::{ScriptEngine, ScriptError};
use hook_types::Record;
use std::sync::Arc;

/// Evaluates a rule's optional guard expression against a record.
#[derive(Clone)]
pub struct RuleGuard {
    engine: Arc<ScriptEngine>,
}

impl RuleGuard {
    pub fn new(engine: Arc<ScriptEngine>) -> Self {
        Self { engine }
    }

    /// No guard means the rule always fires. Evaluation errors are returned,
    /// never treated as `false`.
    pub fn evaluate(&self, guard: Option<&str>, record: &Record) -> Result<bool, ScriptError> {
        match guard.map(str::trim).filter(|g| !g.is_empty()) {
            None => Ok(true),
            Some(expression) => self.engine.eval_guard(expression, record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hook_types::EntityType;
    use serde_json::json;

    fn post(title: &str) -> Record {
        Record::new(
            EntityType::new("blog", "post"),
            json!({ "title": title }).as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn test_absent_guard_passes() {
        let guard = RuleGuard::new(Arc::new(ScriptEngine::new()));
        assert!(guard.evaluate(None, &post("x")).unwrap());
        assert!(guard.evaluate(Some(""), &post("x")).unwrap());
    }

    #[test]
    fn test_guard_blocks() {
        let guard = RuleGuard::new(Arc::new(ScriptEngine::new()));
        let expr = Some(r#"instance.title != "Block this""#);
        assert!(!guard.evaluate(expr, &post("Block this")).unwrap());
        assert!(guard.evaluate(expr, &post("Do not block")).unwrap());
    }

    #[test]
    fn test_syntax_error_propagates() {
        let guard = RuleGuard::new(Arc::new(ScriptEngine::new()));
        assert!(guard.evaluate(Some("instance.title ==="), &post("x")).is_err());
    }
}
