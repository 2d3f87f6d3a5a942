use crate::error::{Result, RuleError};
use crate::executor::ActionExecutor;
use crate::guard::RuleGuard;
use crate::model::{RuleDefinition, RuleId, TriggerKind};
use crate::storage::DefinitionSource;
use hook_core::{Channel, Handler, NotificationBus, RecordEvent};
use hook_types::EntityType;
use std::sync::Arc;
use tracing::{debug, trace};

/// Handler identity a rule is subscribed under.
pub fn handler_id(rule_id: RuleId) -> String {
    format!("RuleDefinition_{}", rule_id)
}

/// What happened when a bound handler fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed,
    TriggerMismatch,
    /// The rule now targets another entity type than the record's.
    EntityMismatch,
    Inactive,
    GuardRejected,
    /// The rule or its action was removed from the store.
    DefinitionMissing,
}

/// Fire-time logic shared by every bound handler. Definitions are read from
/// the store on each event, so edits apply without re-subscribing.
pub struct RuleDispatcher {
    definitions: Arc<dyn DefinitionSource>,
    guard: RuleGuard,
    executor: ActionExecutor,
}

impl RuleDispatcher {
    pub fn new(definitions: Arc<dyn DefinitionSource>, guard: RuleGuard, executor: ActionExecutor) -> Self {
        Self {
            definitions,
            guard,
            executor,
        }
    }

    pub fn dispatch(&self, rule_id: RuleId, event: &mut RecordEvent<'_>) -> Result<DispatchOutcome> {
        let rule = match self.definitions.rule(rule_id) {
            Some(rule) => rule,
            None => {
                debug!(rule_id, "Rule gone before its handler fired");
                return Ok(DispatchOutcome::DefinitionMissing);
            }
        };

        if rule.entity != event.record.entity {
            debug!(rule_id, entity = %event.record.entity, target = %rule.entity, "Rule targets another entity");
            return Ok(DispatchOutcome::EntityMismatch);
        }

        if !rule.trigger.matches(event.channel, event.was_created()) {
            return Ok(DispatchOutcome::TriggerMismatch);
        }

        if !rule.is_active {
            return Ok(DispatchOutcome::Inactive);
        }

        let passed = self
            .guard
            .evaluate(rule.guard_expression(), event.record)
            .map_err(|source| RuleError::GuardEvaluation { rule_id, source })?;
        if !passed {
            debug!(rule_id, record_id = event.record.id, "Guard rejected record");
            return Ok(DispatchOutcome::GuardRejected);
        }

        let action = match self.definitions.action(rule.action_id) {
            Some(action) => action,
            None => {
                debug!(rule_id, action_id = rule.action_id, "Action gone before its rule fired");
                return Ok(DispatchOutcome::DefinitionMissing);
            }
        };

        self.executor.execute(&action, event.record, &event.context)?;
        debug!(rule_id, action_id = action.id, record_id = event.record.id, "Rule executed");
        Ok(DispatchOutcome::Executed)
    }
}

/// One rule's subscription on its entity type's bus channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBinding {
    pub rule_id: RuleId,
    pub entity: EntityType,
    pub trigger: TriggerKind,
    pub handler_id: String,
}

impl RuleBinding {
    pub fn for_rule(rule: &RuleDefinition) -> Self {
        Self {
            rule_id: rule.id,
            entity: rule.entity.clone(),
            trigger: rule.trigger,
            handler_id: handler_id(rule.id),
        }
    }

    pub fn channel(&self) -> Channel {
        self.trigger.channel()
    }

    /// Registers the dispatch handler, replacing any handler already under
    /// this rule's identity on the same channel. Returns true on replace.
    pub fn subscribe(&self, bus: &NotificationBus, dispatcher: Arc<RuleDispatcher>) -> Result<bool> {
        let rule_id = self.rule_id;
        let handler: Handler = Arc::new(move |event: &mut RecordEvent<'_>| -> anyhow::Result<()> {
            match dispatcher.dispatch(rule_id, event) {
                Ok(outcome) => {
                    trace!(rule_id, ?outcome, "Rule handler finished");
                    Ok(())
                }
                // Script errors reach the caller as raised by the script
                Err(RuleError::Script(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            }
        });

        Ok(bus.subscribe(&self.entity, self.channel(), &self.handler_id, handler)?)
    }

    /// Removes this rule's handler from both channels. Missing handlers and
    /// unregistered entity types are fine.
    pub fn unsubscribe(&self, bus: &NotificationBus) -> Result<()> {
        if !bus.is_registered(&self.entity) {
            return Ok(());
        }
        for channel in Channel::ALL {
            bus.unsubscribe(&self.entity, channel, &self.handler_id)?;
        }
        Ok(())
    }

    /// Removes the handler from the channels this binding does not use.
    pub fn unsubscribe_other_channels(&self, bus: &NotificationBus) -> Result<()> {
        for channel in Channel::ALL {
            if channel != self.channel() {
                bus.unsubscribe(&self.entity, channel, &self.handler_id)?;
            }
        }
        Ok(())
    }

    pub fn is_live(&self, bus: &NotificationBus) -> bool {
        bus.is_subscribed(&self.entity, self.channel(), &self.handler_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionDefinition;
    use crate::registry::CallableRegistry;
    use crate::storage::DefinitionStore;
    use hook_config::ActionsConfig;
    use hook_core::RecordStore;
    use hook_script::ScriptEngine;
    use serde_json::json;
    use std::sync::RwLock;

    struct Fixture {
        bus: Arc<NotificationBus>,
        posts: Arc<RecordStore>,
        store: Arc<DefinitionStore>,
        dispatcher: Arc<RuleDispatcher>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(NotificationBus::new());
        let posts = RecordStore::new(EntityType::new("blog", "post"), bus.clone()).unwrap();
        let store = Arc::new(DefinitionStore::new());
        let engine = Arc::new(ScriptEngine::new());
        let executor = ActionExecutor::new(
            engine.clone(),
            Arc::new(CallableRegistry::new()),
            None,
            Arc::new(RwLock::new(ActionsConfig::default())),
        );
        let dispatcher = Arc::new(RuleDispatcher::new(store.clone(), RuleGuard::new(engine), executor));
        Fixture {
            bus,
            posts,
            store,
            dispatcher,
        }
    }

    fn rule(f: &Fixture, trigger: TriggerKind) -> RuleDefinition {
        let action = f
            .store
            .save_action(ActionDefinition::inline_script("rename", r#"instance.title = "Changed""#))
            .unwrap();
        f.store
            .save_rule(RuleDefinition::new("r", trigger, action.id, EntityType::new("blog", "post")))
            .unwrap()
    }

    #[test]
    fn test_handler_id_format() {
        assert_eq!(handler_id(12), "RuleDefinition_12");
    }

    #[test]
    fn test_subscribe_binds_expected_channel() {
        let f = fixture();
        let on_delete = RuleBinding::for_rule(&rule(&f, TriggerKind::OnDelete));

        assert!(!on_delete.subscribe(&f.bus, f.dispatcher.clone()).unwrap());
        assert!(on_delete.subscribe(&f.bus, f.dispatcher.clone()).unwrap());

        let entity = EntityType::new("blog", "post");
        assert_eq!(f.bus.handler_ids(&entity, Channel::AfterDelete), vec![on_delete.handler_id.clone()]);
        assert!(f.bus.handler_ids(&entity, Channel::AfterSave).is_empty());
        assert!(on_delete.is_live(&f.bus));
    }

    #[test]
    fn test_dispatch_on_create_only() {
        let f = fixture();
        RuleBinding::for_rule(&rule(&f, TriggerKind::OnCreate))
            .subscribe(&f.bus, f.dispatcher.clone())
            .unwrap();

        let mut post = f.posts.create(json!({"title": "Test"})).unwrap();
        assert_eq!(post.get_str("title"), Some("Changed"));

        post.set("title", "Edited");
        f.posts.save(&mut post).unwrap();
        assert_eq!(post.get_str("title"), Some("Edited"));
    }

    #[test]
    fn test_dispatch_outcomes() {
        let f = fixture();
        let rule = rule(&f, TriggerKind::OnUpdate);
        let mut record = f.posts.create(json!({"title": "Test"})).unwrap();

        let mut created = RecordEvent {
            channel: Channel::AfterSave,
            record: &mut record,
            context: json!({"created": true}).as_object().cloned().unwrap(),
        };
        assert_eq!(
            f.dispatcher.dispatch(rule.id, &mut created).unwrap(),
            DispatchOutcome::TriggerMismatch
        );

        let mut inactive = rule.clone();
        inactive.is_active = false;
        f.store.save_rule(inactive).unwrap();
        let mut updated = RecordEvent {
            channel: Channel::AfterSave,
            record: &mut record,
            context: json!({"created": false}).as_object().cloned().unwrap(),
        };
        assert_eq!(f.dispatcher.dispatch(rule.id, &mut updated).unwrap(), DispatchOutcome::Inactive);

        assert_eq!(
            f.dispatcher.dispatch(999, &mut updated).unwrap(),
            DispatchOutcome::DefinitionMissing
        );
    }

    #[test]
    fn test_dispatch_skips_other_entity() {
        let f = fixture();
        let rule = rule(&f, TriggerKind::OnCreate);
        RuleBinding::for_rule(&rule).subscribe(&f.bus, f.dispatcher.clone()).unwrap();

        // Retargeted in the store while the old handler is still bound
        let mut moved = rule.clone();
        moved.entity = EntityType::new("blog", "comment");
        f.store.import(Vec::new(), vec![moved]).unwrap();

        let mut record = f.posts.create(json!({"title": "Test"})).unwrap();
        assert_eq!(record.get_str("title"), Some("Test"));

        let mut created = RecordEvent {
            channel: Channel::AfterSave,
            record: &mut record,
            context: json!({"created": true}).as_object().cloned().unwrap(),
        };
        assert_eq!(
            f.dispatcher.dispatch(rule.id, &mut created).unwrap(),
            DispatchOutcome::EntityMismatch
        );
    }

    #[test]
    fn test_guard_error_surfaces() {
        let f = fixture();
        let rule = rule(&f, TriggerKind::OnCreate);
        f.store
            .save_rule(rule.clone().with_guard("instance.author == \"me\""))
            .unwrap();
        RuleBinding::for_rule(&rule).subscribe(&f.bus, f.dispatcher.clone()).unwrap();

        let err = f.posts.create(json!({"title": "Test"})).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RuleError>(),
            Some(RuleError::GuardEvaluation { .. })
        ));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let f = fixture();
        let binding = RuleBinding::for_rule(&rule(&f, TriggerKind::OnCreate));
        binding.subscribe(&f.bus, f.dispatcher.clone()).unwrap();

        binding.unsubscribe(&f.bus).unwrap();
        binding.unsubscribe(&f.bus).unwrap();

        assert!(!binding.is_live(&f.bus));
        let post = f.posts.create(json!({"title": "Test"})).unwrap();
        assert_eq!(post.get_str("title"), Some("Test"));
    }

    #[test]
    fn test_unsubscribe_unknown_entity_is_noop() {
        let f = fixture();
        let mut rule = rule(&f, TriggerKind::OnCreate);
        rule.entity = EntityType::new("blog", "comment");
        assert!(RuleBinding::for_rule(&rule).unsubscribe(&f.bus).is_ok());
    }
}
