use anyhow::{anyhow, Context, Result};
use hook_config::GlobalConfig;
use hook_core::{EntityRegistry, NotificationBus, RecordStore, SharedBus};
use hook_rule::{DefinitionSet, RuleEngine, TaskQueue, TokioTaskQueue};
use hook_types::{EntityType, Record, RecordId};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A record change to replay against the stores.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create {
        entity: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    Update {
        entity: String,
        id: RecordId,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    Delete {
        entity: String,
        id: RecordId,
    },
}

impl Operation {
    pub fn entity(&self) -> &str {
        match self {
            Operation::Create { entity, .. }
            | Operation::Update { entity, .. }
            | Operation::Delete { entity, .. } => entity,
        }
    }

    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<Operation>> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading operations file {}", path.as_ref().display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

// 定义 AppState（供 main.rs 和测试使用）
pub struct AppState {
    pub bus: SharedBus,
    pub engine: RuleEngine,
    pub entities: Arc<EntityRegistry>,
    pub stores: BTreeMap<EntityType, Arc<RecordStore>>,
}

impl AppState {
    /// Creates the record stores, checks and loads the definitions, then
    /// binds every rule. Must run inside a tokio runtime.
    pub fn build(config: &GlobalConfig, definitions: DefinitionSet) -> Result<Self> {
        let bus: SharedBus = Arc::new(NotificationBus::new());
        let entities = Arc::new(EntityRegistry::new());

        let mut stores = BTreeMap::new();
        for entity in &definitions.entities {
            let store = RecordStore::new(entity.clone(), bus.clone())?;
            entities.register(store.clone())?;
            stores.insert(entity.clone(), store);
        }

        let queue: Arc<dyn TaskQueue> = Arc::new(TokioTaskQueue::current()?);
        let engine = RuleEngine::builder(bus.clone())
            .script_config(config.script.clone())
            .actions_config(config.actions.clone())
            .task_queue(queue)
            .build()?;

        for action in &definitions.actions {
            engine
                .check_action(action)
                .with_context(|| format!("action {} ({})", action.id, action.name))?;
        }
        engine.store().import(definitions.actions, Vec::new())?;

        for rule in &definitions.rules {
            engine
                .check_rule(rule)
                .with_context(|| format!("rule {} ({})", rule.id, rule.name))?;
        }
        engine.store().import(Vec::new(), definitions.rules)?;

        let bound = engine.load_rules()?;
        info!(entities = stores.len(), rules = bound, "Application state ready");

        Ok(Self {
            bus,
            engine,
            entities,
            stores,
        })
    }

    pub fn store(&self, label: &str) -> Result<&Arc<RecordStore>> {
        let entity = self.entities.lookup(label)?;
        self.stores
            .get(&entity)
            .ok_or_else(|| anyhow!("no record store for {}", entity))
    }

    /// Applies one operation and returns the record as the caller sees it
    /// after the rules ran.
    pub fn apply(&self, operation: &Operation) -> Result<Record> {
        let store = self.store(operation.entity())?;
        match operation {
            Operation::Create { fields, .. } => store.create(Value::Object(fields.clone())),
            Operation::Update { id, fields, .. } => {
                let mut record = store
                    .get(*id)
                    .ok_or_else(|| anyhow!("{} #{} not found", operation.entity(), id))?;
                for (name, value) in fields {
                    record.set(name.clone(), value.clone());
                }
                store.save(&mut record)?;
                Ok(record)
            }
            Operation::Delete { id, .. } => {
                let record = store
                    .get(*id)
                    .ok_or_else(|| anyhow!("{} #{} not found", operation.entity(), id))?;
                store.delete(&record)?;
                Ok(record)
            }
        }
    }

    /// Applies every operation in order. Failures are logged and counted;
    /// replay continues with the next operation.
    pub fn replay(&self, operations: &[Operation]) -> usize {
        let mut failures = 0;
        for (index, operation) in operations.iter().enumerate() {
            match self.apply(operation) {
                Ok(record) => {
                    let fields = Value::Object(record.fields.clone());
                    info!(
                        index,
                        entity = %record.entity,
                        id = record.id,
                        fields = %fields,
                        "Operation applied"
                    );
                }
                Err(e) => {
                    failures += 1;
                    warn!(index, entity = operation.entity(), error = %e, "Operation failed");
                }
            }
        }
        failures
    }

    /// Current contents of every store, keyed by entity label.
    pub fn snapshot(&self) -> Value {
        let tables: Map<String, Value> = self
            .stores
            .iter()
            .map(|(entity, store)| {
                let rows = store
                    .all()
                    .into_iter()
                    .map(|record| record.to_instance())
                    .collect();
                (entity.to_string(), Value::Array(rows))
            })
            .collect();
        Value::Object(tables)
    }
}
