use crate::error::{Result, RuleError};
use crate::lifecycle::{RuleStoreEvent, RuleStoreObserver};
use crate::model::{ActionDefinition, ActionId, RuleDefinition, RuleId};
use chrono::Utc;
use hook_types::EntityType;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{info, warn};

/// Fire-time read access to the stored definitions.
pub trait DefinitionSource: Send + Sync {
    fn rule(&self, id: RuleId) -> Option<RuleDefinition>;
    fn action(&self, id: ActionId) -> Option<ActionDefinition>;
}

/// 规则与动作存储（内存实现）
///
/// Rule writes notify the registered observers after the write, outside
/// of the table locks. A save whose observers fail is rolled back.
/// Deleting an action deletes the rules pointing at it.
pub struct DefinitionStore {
    actions: RwLock<BTreeMap<ActionId, ActionDefinition>>,
    rules: RwLock<BTreeMap<RuleId, RuleDefinition>>,
    // Held across a rule write and its notification so observers see
    // writes in store order
    rule_writes: Mutex<()>,
    next_action_id: AtomicU64,
    next_rule_id: AtomicU64,
    observers: RwLock<Vec<Weak<dyn RuleStoreObserver>>>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(BTreeMap::new()),
            rules: RwLock::new(BTreeMap::new()),
            rule_writes: Mutex::new(()),
            next_action_id: AtomicU64::new(1),
            next_rule_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Observers are held weakly; dropping the observer detaches it.
    pub fn add_observer(&self, observer: &Arc<dyn RuleStoreObserver>) -> Result<()> {
        self.observers.write()?.push(Arc::downgrade(observer));
        Ok(())
    }

    /// Inserts (id 0 or unknown id) or replaces an action definition.
    pub fn save_action(&self, mut action: ActionDefinition) -> Result<ActionDefinition> {
        let mut actions = self.actions.write()?;
        if action.id == 0 {
            action.id = self.next_action_id.fetch_add(1, Ordering::SeqCst);
        } else {
            self.next_action_id.fetch_max(action.id + 1, Ordering::SeqCst);
        }
        action.updated_at = Utc::now();
        actions.insert(action.id, action.clone());
        Ok(action)
    }

    /// Removes an action and every rule that references it. Returns the
    /// number of rules removed.
    pub fn delete_action(&self, id: ActionId) -> Result<usize> {
        let removed = self.actions.write()?.remove(&id);
        if removed.is_none() {
            return Err(RuleError::ActionNotFound(id));
        }

        let dependents: Vec<RuleId> = self.rules_for_action(id).iter().map(|r| r.id).collect();
        for rule_id in &dependents {
            self.delete_rule(*rule_id)?;
        }

        info!(action_id = id, rules_removed = dependents.len(), "Action deleted");
        Ok(dependents.len())
    }

    /// Inserts or replaces a rule, then notifies observers with
    /// `Created` or `Updated`. The referenced action must exist. If an
    /// observer fails the previous state of the rule is restored.
    pub fn save_rule(&self, mut rule: RuleDefinition) -> Result<RuleDefinition> {
        if self.action(rule.action_id).is_none() {
            return Err(RuleError::ActionNotFound(rule.action_id));
        }

        let _serial = self.rule_writes.lock()?;

        let previous = {
            let mut rules = self.rules.write()?;
            if rule.id == 0 {
                rule.id = self.next_rule_id.fetch_add(1, Ordering::SeqCst);
            } else {
                self.next_rule_id.fetch_max(rule.id + 1, Ordering::SeqCst);
            }
            rule.updated_at = Utc::now();
            rules.insert(rule.id, rule.clone())
        };
        let created = previous.is_none();

        let event = if created {
            RuleStoreEvent::Created(rule.clone())
        } else {
            RuleStoreEvent::Updated(rule.clone())
        };
        if let Err(e) = self.notify(&event) {
            let mut rules = self.rules.write()?;
            match previous {
                Some(previous) => rules.insert(rule.id, previous),
                None => rules.remove(&rule.id),
            };
            warn!(rule_id = rule.id, error = %e, "Rule save rolled back");
            return Err(e);
        }

        info!(rule_id = rule.id, rule_name = %rule.name, created, "Rule saved");
        Ok(rule)
    }

    /// Removes a rule, then notifies observers with `Deleted`.
    pub fn delete_rule(&self, id: RuleId) -> Result<RuleDefinition> {
        let _serial = self.rule_writes.lock()?;

        let rule = self
            .rules
            .write()?
            .remove(&id)
            .ok_or(RuleError::RuleNotFound(id))?;

        info!(rule_id = id, "Rule deleted");
        self.notify(&RuleStoreEvent::Deleted(rule.clone()))?;
        Ok(rule)
    }

    /// Loads definitions without notifying observers.
    pub fn import(&self, actions: Vec<ActionDefinition>, rules: Vec<RuleDefinition>) -> Result<()> {
        for action in actions {
            self.save_action(action)?;
        }
        for mut rule in rules {
            if self.action(rule.action_id).is_none() {
                return Err(RuleError::ActionNotFound(rule.action_id));
            }
            let mut stored = self.rules.write()?;
            if rule.id == 0 {
                rule.id = self.next_rule_id.fetch_add(1, Ordering::SeqCst);
            } else {
                self.next_rule_id.fetch_max(rule.id + 1, Ordering::SeqCst);
            }
            stored.insert(rule.id, rule);
        }
        Ok(())
    }

    pub fn list_rules(&self) -> Vec<RuleDefinition> {
        match self.rules.read() {
            Ok(rules) => rules.values().cloned().collect(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in list_rules: {}", e);
                Vec::new()
            }
        }
    }

    pub fn list_actions(&self) -> Vec<ActionDefinition> {
        match self.actions.read() {
            Ok(actions) => actions.values().cloned().collect(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in list_actions: {}", e);
                Vec::new()
            }
        }
    }

    pub fn rules_for_action(&self, action_id: ActionId) -> Vec<RuleDefinition> {
        self.list_rules()
            .into_iter()
            .filter(|r| r.action_id == action_id)
            .collect()
    }

    pub fn rules_for_entity(&self, entity: &EntityType) -> Vec<RuleDefinition> {
        self.list_rules()
            .into_iter()
            .filter(|r| &r.entity == entity)
            .collect()
    }

    fn notify(&self, event: &RuleStoreEvent) -> Result<()> {
        let observers: Vec<Arc<dyn RuleStoreObserver>> = {
            let mut observers = self.observers.write()?;
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.notify(event)?;
        }
        Ok(())
    }
}

impl Default for DefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionSource for DefinitionStore {
    fn rule(&self, id: RuleId) -> Option<RuleDefinition> {
        match self.rules.read() {
            Ok(rules) => rules.get(&id).cloned(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in rule: {}", e);
                None
            }
        }
    }

    fn action(&self, id: ActionId) -> Option<ActionDefinition> {
        match self.actions.read() {
            Ok(actions) => actions.get(&id).cloned(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in action: {}", e);
                None
            }
        }
    }
}
