use hook_types::Record;
use rhai::{Dynamic, Engine, Scope, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Name of the only variable bound in guard and script scopes.
pub const INSTANCE_VAR: &str = "instance";

pub const DEFAULT_MAX_OPERATIONS: u64 = 100_000;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(#[from] rhai::ParseError),

    #[error("runtime error: {0}")]
    Runtime(#[from] Box<rhai::EvalAltResult>),

    #[error("expected a boolean, got {0}")]
    NotBoolean(String),

    #[error("instance write-back failed: {0}")]
    WriteBack(String),
}

pub struct ScriptEngine {
    engine: Engine,
    // Compiled statement blocks, keyed by source text
    script_cache: RwLock<HashMap<String, Arc<AST>>>,
    // Compiled single expressions (guards), keyed by source text
    expression_cache: RwLock<HashMap<String, Arc<AST>>>,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::with_max_operations(DEFAULT_MAX_OPERATIONS)
    }

    pub fn with_max_operations(max_operations: u64) -> Self {
        let mut engine = Engine::new();

        // 0 disables the limit
        engine.set_max_operations(max_operations);

        // Reading a field the record does not have is an error, not `()`
        engine.set_fail_on_invalid_map_property(true);

        engine.register_fn("now_ms", || chrono::Utc::now().timestamp_millis());

        // Redirect print() to tracing::info!
        engine.on_print(|x| {
            tracing::info!("SCRIPT: {}", x);
        });

        Self {
            engine,
            script_cache: RwLock::new(HashMap::new()),
            expression_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the `print()` sink.
    pub fn with_print_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.engine.on_print(handler);
        self
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Syntax check for a statement block.
    pub fn compile(&self, script: &str) -> Result<(), ScriptError> {
        self.cached(&self.script_cache, script, |src| self.engine.compile(src))
            .map(|_| ())
    }

    /// Syntax check for a single expression.
    pub fn compile_expression(&self, expression: &str) -> Result<(), ScriptError> {
        self.cached(&self.expression_cache, expression, |src| {
            self.engine.compile_expression(src)
        })
        .map(|_| ())
    }

    /// Evaluates `expression` with `instance` bound to the record.
    /// Returns true if the expression evaluates to true.
    pub fn eval_guard(&self, expression: &str, record: &Record) -> Result<bool, ScriptError> {
        let ast = self.cached(&self.expression_cache, expression, |src| {
            self.engine.compile_expression(src)
        })?;

        let mut scope = Scope::new();
        scope.push_dynamic(INSTANCE_VAR, rhai::serde::to_dynamic(record.to_instance())?);

        let result: Dynamic = self.engine.eval_ast_with_scope(&mut scope, &ast)?;
        result
            .as_bool()
            .map_err(|_| ScriptError::NotBoolean(result.type_name().to_string()))
    }

    /// Runs `script` with `instance` bound to the record, then copies the
    /// (possibly modified) instance fields back into it.
    pub fn run_script(&self, script: &str, record: &mut Record) -> Result<(), ScriptError> {
        let ast = self.cached(&self.script_cache, script, |src| self.engine.compile(src))?;

        let mut scope = Scope::new();
        scope.push_dynamic(INSTANCE_VAR, rhai::serde::to_dynamic(record.to_instance())?);

        self.engine.run_ast_with_scope(&mut scope, &ast)?;

        let instance = scope
            .get_value::<Dynamic>(INSTANCE_VAR)
            .ok_or_else(|| ScriptError::WriteBack("instance went out of scope".to_string()))?;
        let value: serde_json::Value = rhai::serde::from_dynamic(&instance)?;
        record.apply_instance(value).map_err(ScriptError::WriteBack)
    }

    pub fn cached_count(&self) -> usize {
        let scripts = match self.script_cache.read() {
            Ok(cache) => cache.len(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in cached_count: {}", e);
                0
            }
        };
        let expressions = match self.expression_cache.read() {
            Ok(cache) => cache.len(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in cached_count: {}", e);
                0
            }
        };
        scripts + expressions
    }

    pub fn clear_cache(&self) {
        for cache in [&self.script_cache, &self.expression_cache] {
            match cache.write() {
                Ok(mut cache) => cache.clear(),
                Err(e) => tracing::error!("Failed to acquire write lock in clear_cache: {}", e),
            }
        }
    }

    fn cached(
        &self,
        cache: &RwLock<HashMap<String, Arc<AST>>>,
        source: &str,
        compile: impl FnOnce(&str) -> Result<AST, rhai::ParseError>,
    ) -> Result<Arc<AST>, ScriptError> {
        match cache.read() {
            Ok(read) => {
                if let Some(ast) = read.get(source) {
                    return Ok(ast.clone());
                }
            }
            Err(e) => tracing::error!("Failed to acquire read lock on script cache: {}", e),
        }

        let ast = Arc::new(compile(source)?);

        // A poisoned cache only costs a recompile next time
        match cache.write() {
            Ok(mut write) => {
                write.insert(source.to_string(), ast.clone());
            }
            Err(e) => tracing::error!("Failed to acquire write lock on script cache: {}", e),
        }
        Ok(ast)
    }
}
