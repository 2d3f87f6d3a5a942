use crate::binding::RuleDispatcher;
use crate::error::{Result, RuleError};
use crate::executor::{ActionExecutor, SharedActionsConfig};
use crate::functions::{register_builtin_functions, register_script_functions};
use crate::guard::RuleGuard;
use crate::lifecycle::{RuleLifecycleManager, RuleStoreObserver};
use crate::loader;
use crate::model::{ActionDefinition, ActionId, ActionKind, RuleDefinition, RuleId};
use crate::queue::TaskQueue;
use crate::registry::CallableRegistry;
use crate::storage::{DefinitionSource, DefinitionStore};
use hook_config::{ActionsConfig, ScriptConfig};
use hook_core::{CoreError, SharedBus};
use hook_script::ScriptEngine;
use std::sync::{Arc, RwLock};
use tracing::info;

type PrintHandler = Box<dyn Fn(&str) + Send + Sync>;

/// 规则引擎构建器
pub struct RuleEngineBuilder {
    bus: SharedBus,
    store: Option<Arc<DefinitionStore>>,
    registry: Option<Arc<CallableRegistry>>,
    script_engine: Option<ScriptEngine>,
    script_config: ScriptConfig,
    print_handler: Option<PrintHandler>,
    task_queue: Option<Arc<dyn TaskQueue>>,
    actions_config: ActionsConfig,
}

impl RuleEngineBuilder {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            bus,
            store: None,
            registry: None,
            script_engine: None,
            script_config: ScriptConfig::default(),
            print_handler: None,
            task_queue: None,
            actions_config: ActionsConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<DefinitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<CallableRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides the engine built from the script config.
    pub fn script_engine(mut self, engine: ScriptEngine) -> Self {
        self.script_engine = Some(engine);
        self
    }

    pub fn script_config(mut self, config: ScriptConfig) -> Self {
        self.script_config = config;
        self
    }

    /// Sink for `print()` calls made by guards and inline scripts.
    pub fn print_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.print_handler = Some(Box::new(handler));
        self
    }

    pub fn task_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.task_queue = Some(queue);
        self
    }

    pub fn actions_config(mut self, config: ActionsConfig) -> Self {
        self.actions_config = config;
        self
    }

    pub fn build(self) -> Result<RuleEngine> {
        let mut script_engine = self
            .script_engine
            .unwrap_or_else(|| ScriptEngine::with_max_operations(self.script_config.max_operations));
        if let Some(handler) = self.print_handler {
            script_engine = script_engine.with_print_handler(handler);
        }
        register_script_functions(&mut script_engine);
        let script_engine = Arc::new(script_engine);

        let registry = self.registry.unwrap_or_default();
        register_builtin_functions(&registry)?;

        let store = self.store.unwrap_or_default();
        let settings: SharedActionsConfig = Arc::new(RwLock::new(self.actions_config));

        let executor = ActionExecutor::new(
            script_engine.clone(),
            registry.clone(),
            self.task_queue,
            settings.clone(),
        );
        let dispatcher = Arc::new(RuleDispatcher::new(
            store.clone(),
            RuleGuard::new(script_engine.clone()),
            executor,
        ));
        let manager = Arc::new(RuleLifecycleManager::new(self.bus.clone(), dispatcher));

        // The store only holds the manager weakly
        let observer: Arc<dyn RuleStoreObserver> = manager.clone();
        store.add_observer(&observer)?;

        info!("Rule engine ready");

        Ok(RuleEngine {
            bus: self.bus,
            store,
            registry,
            script_engine,
            manager,
            settings,
        })
    }
}

/// 规则引擎
///
/// Owns the lifecycle manager that keeps bus subscriptions in step with
/// the definition store. Writes through the engine or directly through
/// the store behave the same.
pub struct RuleEngine {
    bus: SharedBus,
    store: Arc<DefinitionStore>,
    registry: Arc<CallableRegistry>,
    script_engine: Arc<ScriptEngine>,
    manager: Arc<RuleLifecycleManager>,
    settings: SharedActionsConfig,
}

impl RuleEngine {
    pub fn builder(bus: SharedBus) -> RuleEngineBuilder {
        RuleEngineBuilder::new(bus)
    }

    /// 添加动作
    pub fn add_action(&self, mut action: ActionDefinition) -> Result<ActionDefinition> {
        action.id = 0;
        let action = self.store.save_action(action)?;
        info!(action_id = action.id, action_name = %action.name, "Action added");
        Ok(action)
    }

    /// Replaces a stored action. Bound rules pick up the new body on their
    /// next event.
    pub fn update_action(&self, action: ActionDefinition) -> Result<ActionDefinition> {
        if self.store.action(action.id).is_none() {
            return Err(RuleError::ActionNotFound(action.id));
        }
        self.store.save_action(action)
    }

    /// Deletes an action and the rules that use it.
    pub fn delete_action(&self, id: ActionId) -> Result<usize> {
        self.store.delete_action(id)
    }

    pub fn get_action(&self, id: ActionId) -> Result<ActionDefinition> {
        self.store.action(id).ok_or(RuleError::ActionNotFound(id))
    }

    /// 添加规则
    pub fn add_rule(&self, mut rule: RuleDefinition) -> Result<RuleDefinition> {
        rule.id = 0;
        self.store.save_rule(rule)
    }

    pub fn update_rule(&self, rule: RuleDefinition) -> Result<RuleDefinition> {
        if self.store.rule(rule.id).is_none() {
            return Err(RuleError::RuleNotFound(rule.id));
        }
        self.store.save_rule(rule)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<RuleDefinition> {
        self.store.delete_rule(id)
    }

    pub fn get_rule(&self, id: RuleId) -> Result<RuleDefinition> {
        self.store.rule(id).ok_or(RuleError::RuleNotFound(id))
    }

    pub fn list_rules(&self) -> Vec<RuleDefinition> {
        self.store.list_rules()
    }

    /// Binds every rule already in the store.
    pub fn load_rules(&self) -> Result<usize> {
        loader::load_rules(&self.store, &self.manager)
    }

    /// Flips between queued and inline task execution. Takes effect on the
    /// next task action.
    pub fn set_use_async(&self, use_async: bool) -> Result<()> {
        self.settings.write()?.celery_use_async = use_async;
        info!(use_async, "Task execution mode changed");
        Ok(())
    }

    pub fn use_async(&self) -> bool {
        match self.settings.read() {
            Ok(settings) => settings.celery_use_async,
            Err(_) => false,
        }
    }

    /// Checks that an action can run: the script parses or the reference
    /// resolves.
    pub fn check_action(&self, action: &ActionDefinition) -> Result<()> {
        let reference = action.body.trim();
        match action.kind {
            ActionKind::InlineScript => Ok(self.script_engine.compile(&action.body)?),
            ActionKind::NamedFunctionReference => match self.registry.function(reference) {
                Some(_) => Ok(()),
                None => Err(RuleError::ActionLookup {
                    reference: reference.to_string(),
                }),
            },
            ActionKind::QueuedTaskReference => match self.registry.task(reference) {
                Some(_) => Ok(()),
                None => Err(RuleError::ActionLookup {
                    reference: reference.to_string(),
                }),
            },
        }
    }

    /// Checks that a rule can be bound: known entity type, stored action
    /// and a guard that parses.
    pub fn check_rule(&self, rule: &RuleDefinition) -> Result<()> {
        if !self.bus.is_registered(&rule.entity) {
            return Err(CoreError::UnknownEntity(rule.entity.clone()).into());
        }
        if self.store.action(rule.action_id).is_none() {
            return Err(RuleError::ActionNotFound(rule.action_id));
        }
        if let Some(guard) = rule.guard_expression() {
            self.script_engine.compile_expression(guard)?;
        }
        Ok(())
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<DefinitionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CallableRegistry> {
        &self.registry
    }

    pub fn script_engine(&self) -> &Arc<ScriptEngine> {
        &self.script_engine
    }

    pub fn manager(&self) -> &Arc<RuleLifecycleManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TriggerKind;
    use hook_core::{Channel, NotificationBus, RecordStore};
    use hook_types::EntityType;
    use serde_json::json;

    fn post() -> EntityType {
        EntityType::new("blog", "post")
    }

    fn setup() -> (RuleEngine, Arc<RecordStore>) {
        let bus = Arc::new(NotificationBus::new());
        let posts = RecordStore::new(post(), bus.clone()).unwrap();
        let engine = RuleEngine::builder(bus).build().unwrap();
        (engine, posts)
    }

    #[test]
    fn test_add_rule_binds_handler() {
        let (engine, posts) = setup();
        let action = engine
            .add_action(ActionDefinition::inline_script("rename", r#"instance.title = "Changed";"#))
            .unwrap();
        let rule = engine
            .add_rule(RuleDefinition::new("r", TriggerKind::OnCreate, action.id, post()))
            .unwrap();

        assert!(engine.bus().is_subscribed(&post(), Channel::AfterSave, &rule.handler_id()));
        let record = posts.create(json!({"title": "Test"})).unwrap();
        assert_eq!(record.get_str("title"), Some("Changed"));
    }

    #[test]
    fn test_update_requires_existing() {
        let (engine, _posts) = setup();
        let mut action = ActionDefinition::inline_script("a", "");
        action.id = 5;
        assert!(matches!(engine.update_action(action), Err(RuleError::ActionNotFound(5))));

        let mut rule = RuleDefinition::new("r", TriggerKind::OnCreate, 1, post());
        rule.id = 9;
        assert!(matches!(engine.update_rule(rule), Err(RuleError::RuleNotFound(9))));
        assert!(matches!(engine.get_rule(9), Err(RuleError::RuleNotFound(9))));
    }

    #[test]
    fn test_check_action() {
        let (engine, _posts) = setup();

        assert!(engine
            .check_action(&ActionDefinition::inline_script("ok", "instance.x = 1;"))
            .is_ok());
        assert!(matches!(
            engine.check_action(&ActionDefinition::inline_script("bad", "instance.x = ;")),
            Err(RuleError::Script(_))
        ));
        assert!(engine
            .check_action(&ActionDefinition::function("log", "hook.builtin.log_instance"))
            .is_ok());
        assert!(matches!(
            engine.check_action(&ActionDefinition::task("missing", "app.tasks.missing")),
            Err(RuleError::ActionLookup { .. })
        ));
    }

    #[test]
    fn test_check_rule() {
        let (engine, _posts) = setup();
        let action = engine.add_action(ActionDefinition::inline_script("a", "")).unwrap();

        let rule = RuleDefinition::new("r", TriggerKind::OnCreate, action.id, post());
        assert!(engine.check_rule(&rule).is_ok());
        assert!(engine.check_rule(&rule.clone().with_guard("instance.title ==")).is_err());

        let foreign = RuleDefinition::new("r", TriggerKind::OnCreate, action.id, EntityType::new("shop", "order"));
        assert!(matches!(
            engine.check_rule(&foreign),
            Err(RuleError::Core(CoreError::UnknownEntity(_)))
        ));
    }

    #[test]
    fn test_set_use_async() {
        let (engine, _posts) = setup();
        assert!(!engine.use_async());
        engine.set_use_async(true).unwrap();
        assert!(engine.use_async());
    }
}
