use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Record category a rule watches, identified by its label pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "EntityLabels")]
pub struct EntityType {
    pub app_label: String,
    pub model_name: String,
}

// Model names are case-insensitive; normalize on the way in
#[derive(Deserialize)]
struct EntityLabels {
    app_label: String,
    model_name: String,
}

impl From<EntityLabels> for EntityType {
    fn from(labels: EntityLabels) -> Self {
        EntityType::new(labels.app_label, labels.model_name)
    }
}

impl EntityType {
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into().to_lowercase(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model_name)
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Parses `app_label.model_name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() => {
                Ok(EntityType::new(app, model))
            }
            _ => Err(format!("invalid entity type label: {:?}", s)),
        }
    }
}
