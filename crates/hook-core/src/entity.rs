use crate::error::{CoreError, Result};
use hook_types::{EntityType, Record, RecordId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Read access to the stored records of one entity type.
pub trait RecordSource: Send + Sync {
    fn entity(&self) -> &EntityType;
    fn fetch(&self, id: RecordId) -> Option<Record>;
}

/// Resolves a serializable (label pair, id) back to a live record.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, entity: &EntityType, id: RecordId) -> Result<Record>;
}

/// Maps entity types to the sources that hold their records.
#[derive(Default)]
pub struct EntityRegistry {
    sources: RwLock<HashMap<EntityType, Arc<dyn RecordSource>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: Arc<dyn RecordSource>) -> Result<()> {
        let entity = source.entity().clone();
        self.sources.write()?.insert(entity.clone(), source);
        tracing::debug!(entity = %entity, "Entity source registered");
        Ok(())
    }

    pub fn entity_types(&self) -> Vec<EntityType> {
        match self.sources.read() {
            Ok(sources) => {
                let mut types: Vec<_> = sources.keys().cloned().collect();
                types.sort();
                types
            }
            Err(e) => {
                tracing::error!("Failed to acquire read lock in entity_types: {}", e);
                Vec::new()
            }
        }
    }

    /// Looks an entity type up by its `app_label.model_name` label.
    pub fn lookup(&self, label: &str) -> Result<EntityType> {
        let entity: EntityType = label
            .parse()
            .map_err(|_| CoreError::UnknownEntity(EntityType::new(label, "")))?;
        let sources = self.sources.read()?;
        if sources.contains_key(&entity) {
            Ok(entity)
        } else {
            Err(CoreError::UnknownEntity(entity))
        }
    }
}

impl EntityResolver for EntityRegistry {
    fn resolve(&self, entity: &EntityType, id: RecordId) -> Result<Record> {
        let source = {
            let sources = self.sources.read()?;
            sources
                .get(entity)
                .cloned()
                .ok_or_else(|| CoreError::UnknownEntity(entity.clone()))?
        };
        source.fetch(id).ok_or_else(|| CoreError::RecordNotFound {
            entity: entity.clone(),
            id,
        })
    }
}
