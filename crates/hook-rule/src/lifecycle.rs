use crate::binding::{RuleBinding, RuleDispatcher};
use crate::error::Result;
use crate::model::{RuleDefinition, RuleId};
use hook_core::SharedBus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A mutation of the rule store.
#[derive(Debug, Clone)]
pub enum RuleStoreEvent {
    Created(RuleDefinition),
    Updated(RuleDefinition),
    Deleted(RuleDefinition),
}

impl RuleStoreEvent {
    pub fn rule(&self) -> &RuleDefinition {
        match self {
            RuleStoreEvent::Created(rule)
            | RuleStoreEvent::Updated(rule)
            | RuleStoreEvent::Deleted(rule) => rule,
        }
    }
}

/// Called synchronously by the rule store after each rule write.
pub trait RuleStoreObserver: Send + Sync {
    fn on_rule_created(&self, rule: &RuleDefinition) -> Result<()>;
    fn on_rule_updated(&self, rule: &RuleDefinition) -> Result<()>;
    fn on_rule_deleted(&self, rule: &RuleDefinition) -> Result<()>;

    fn notify(&self, event: &RuleStoreEvent) -> Result<()> {
        match event {
            RuleStoreEvent::Created(rule) => self.on_rule_created(rule),
            RuleStoreEvent::Updated(rule) => self.on_rule_updated(rule),
            RuleStoreEvent::Deleted(rule) => self.on_rule_deleted(rule),
        }
    }
}

/// Keeps the bus subscriptions in step with the stored rules.
///
/// The binding table remembers each rule's last subscribed entity type and
/// channel, so an update that moves a rule leaves nothing behind.
pub struct RuleLifecycleManager {
    bus: SharedBus,
    dispatcher: Arc<RuleDispatcher>,
    bindings: Mutex<HashMap<RuleId, RuleBinding>>,
}

impl RuleLifecycleManager {
    pub fn new(bus: SharedBus, dispatcher: Arc<RuleDispatcher>) -> Self {
        Self {
            bus,
            dispatcher,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes (or re-subscribes) the rule's handler.
    pub fn register(&self, rule: &RuleDefinition) -> Result<()> {
        let binding = RuleBinding::for_rule(rule);
        let mut bindings = self.bindings.lock()?;

        let replaced = binding.subscribe(&self.bus, self.dispatcher.clone())?;

        match bindings.get(&rule.id) {
            Some(previous) if previous.entity != binding.entity => previous.unsubscribe(&self.bus)?,
            Some(previous) if previous.channel() != binding.channel() => {
                binding.unsubscribe_other_channels(&self.bus)?
            }
            _ => {}
        }

        info!(
            rule_id = rule.id,
            entity = %binding.entity,
            channel = %binding.channel(),
            handler_id = %binding.handler_id,
            replaced,
            "Rule binding registered"
        );
        bindings.insert(rule.id, binding);
        Ok(())
    }

    /// Drops the rule's handler from both channels of its last known entity
    /// type (and of the entity type the rule now names, if different).
    /// Returns false if no binding was tracked.
    pub fn remove(&self, rule: &RuleDefinition) -> Result<bool> {
        let current = RuleBinding::for_rule(rule);
        let mut bindings = self.bindings.lock()?;

        let previous = bindings.remove(&rule.id);
        if let Some(previous) = &previous {
            previous.unsubscribe(&self.bus)?;
        }
        if previous.as_ref().map(|p| p.entity != current.entity).unwrap_or(true) {
            current.unsubscribe(&self.bus)?;
        }

        info!(rule_id = rule.id, tracked = previous.is_some(), "Rule binding removed");
        Ok(previous.is_some())
    }

    pub fn handle(&self, event: &RuleStoreEvent) -> Result<()> {
        debug!(rule_id = event.rule().id, "Rule store event");
        self.notify(event)
    }

    pub fn binding(&self, rule_id: RuleId) -> Option<RuleBinding> {
        match self.bindings.lock() {
            Ok(bindings) => bindings.get(&rule_id).cloned(),
            Err(e) => {
                tracing::error!("Failed to acquire bindings lock: {}", e);
                None
            }
        }
    }

    pub fn binding_count(&self) -> usize {
        match self.bindings.lock() {
            Ok(bindings) => bindings.len(),
            Err(_) => 0,
        }
    }
}

impl RuleStoreObserver for RuleLifecycleManager {
    fn on_rule_created(&self, rule: &RuleDefinition) -> Result<()> {
        self.register(rule)
    }

    // Unconditional: trigger or target may have changed
    fn on_rule_updated(&self, rule: &RuleDefinition) -> Result<()> {
        self.register(rule)
    }

    fn on_rule_deleted(&self, rule: &RuleDefinition) -> Result<()> {
        self.remove(rule).map(|_| ())
    }
}
