use crate::entity::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type RecordId = u64;

/// A stored row of some entity type. `id` is `0` until the record is first saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: EntityType,
    pub id: RecordId,
    pub fields: Map<String, Value>,
    pub updated_at: i64,
}

impl Record {
    pub fn new(entity: EntityType, fields: Map<String, Value>) -> Self {
        Self {
            entity,
            id: 0,
            fields,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id != 0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Object form handed to scripts: the fields plus `id`.
    pub fn to_instance(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::from(self.id));
        Value::Object(map)
    }

    /// Writes back fields from an instance object; `id` is never rewritten.
    pub fn apply_instance(&mut self, instance: Value) -> Result<(), String> {
        match instance {
            Value::Object(mut map) => {
                map.remove("id");
                self.fields = map;
                Ok(())
            }
            other => Err(format!("instance must remain an object map, got {}", other)),
        }
    }
}
