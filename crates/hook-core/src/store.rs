use crate::bus::{Channel, SharedBus};
use crate::entity::RecordSource;
use crate::error::{CoreError, Result};
use hook_types::{EntityType, EventContext, Record, RecordId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// In-memory table for one entity type that publishes change
/// notifications on the bus.
///
/// Notifications are delivered after the table has been written and
/// without holding its lock, so handlers can read or write records of any
/// type. Changes handlers make to the record are visible to the caller but
/// not persisted unless the caller saves again.
pub struct RecordStore {
    entity: EntityType,
    bus: SharedBus,
    rows: RwLock<BTreeMap<RecordId, Record>>,
    next_id: AtomicU64,
}

impl RecordStore {
    pub fn new(entity: EntityType, bus: SharedBus) -> Result<Arc<Self>> {
        bus.register_entity(&entity)?;
        Ok(Arc::new(Self {
            entity,
            bus,
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }))
    }

    /// Builds and saves a record from a JSON object of fields.
    pub fn create(&self, fields: Value) -> anyhow::Result<Record> {
        let fields = match fields {
            Value::Object(map) => map,
            other => anyhow::bail!("record fields must be an object, got {}", other),
        };
        let mut record = Record::new(self.entity.clone(), fields);
        self.save(&mut record)?;
        Ok(record)
    }

    /// Inserts (id 0) or updates the record, then publishes after-save.
    pub fn save(&self, record: &mut Record) -> anyhow::Result<()> {
        self.check_entity(record)?;

        let created = !record.is_saved();
        if created {
            record.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        record.updated_at = chrono::Utc::now().timestamp_millis();

        {
            let mut rows = self.rows.write().map_err(CoreError::from)?;
            if !created && !rows.contains_key(&record.id) {
                return Err(CoreError::RecordNotFound {
                    entity: self.entity.clone(),
                    id: record.id,
                }
                .into());
            }
            rows.insert(record.id, record.clone());
        }

        debug!(entity = %self.entity, id = record.id, created, "Record saved");
        self.bus
            .publish(Channel::AfterSave, record, Some(created), EventContext::new())?;
        Ok(())
    }

    /// Removes the record, then publishes after-delete with a copy of it.
    pub fn delete(&self, record: &Record) -> anyhow::Result<()> {
        self.check_entity(record)?;

        let mut removed = {
            let mut rows = self.rows.write().map_err(CoreError::from)?;
            rows.remove(&record.id).ok_or_else(|| CoreError::RecordNotFound {
                entity: self.entity.clone(),
                id: record.id,
            })?
        };

        debug!(entity = %self.entity, id = removed.id, "Record deleted");
        self.bus
            .publish(Channel::AfterDelete, &mut removed, None, EventContext::new())?;
        Ok(())
    }

    /// Deletes every record matching `predicate`, one notification each.
    pub fn delete_where(&self, predicate: impl Fn(&Record) -> bool) -> anyhow::Result<usize> {
        let matching = self.filter(predicate);
        for record in &matching {
            self.delete(record)?;
        }
        Ok(matching.len())
    }

    pub fn get(&self, id: RecordId) -> Option<Record> {
        match self.rows.read() {
            Ok(rows) => rows.get(&id).cloned(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in get: {}", e);
                None
            }
        }
    }

    pub fn filter(&self, predicate: impl Fn(&Record) -> bool) -> Vec<Record> {
        match self.rows.read() {
            Ok(rows) => rows.values().filter(|r| predicate(r)).cloned().collect(),
            Err(e) => {
                tracing::error!("Failed to acquire read lock in filter: {}", e);
                Vec::new()
            }
        }
    }

    pub fn all(&self) -> Vec<Record> {
        self.filter(|_| true)
    }

    pub fn count(&self) -> usize {
        match self.rows.read() {
            Ok(rows) => rows.len(),
            Err(_) => 0,
        }
    }

    fn check_entity(&self, record: &Record) -> Result<()> {
        if record.entity != self.entity {
            return Err(CoreError::EntityMismatch {
                expected: self.entity.clone(),
                actual: record.entity.clone(),
            });
        }
        Ok(())
    }
}

impl RecordSource for RecordStore {
    fn entity(&self) -> &EntityType {
        &self.entity
    }

    fn fetch(&self, id: RecordId) -> Option<Record> {
        self.get(id)
    }
}
