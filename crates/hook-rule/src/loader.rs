use crate::error::Result;
use crate::lifecycle::RuleLifecycleManager;
use crate::model::{ActionDefinition, RuleDefinition};
use crate::storage::DefinitionStore;
use hook_types::EntityType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Binds every stored rule to the bus. Entity types must already be
/// registered. Returns the number of rules bound.
pub fn load_rules(store: &DefinitionStore, manager: &RuleLifecycleManager) -> Result<usize> {
    let rules = store.list_rules();
    for rule in &rules {
        manager.register(rule)?;
    }
    info!(count = rules.len(), "Stored rules loaded");
    Ok(rules.len())
}

/// Definitions persisted as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionSet {
    /// Entity types to create record tables for
    #[serde(default)]
    pub entities: Vec<EntityType>,

    #[serde(default)]
    pub actions: Vec<ActionDefinition>,

    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl DefinitionSet {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Puts the actions and rules into the store without binding them.
    pub fn import_into(self, store: &DefinitionStore) -> Result<()> {
        store.import(self.actions, self.rules)
    }
}
