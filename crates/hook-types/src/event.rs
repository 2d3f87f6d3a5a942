use serde_json::{Map, Value};

/// Extra keyword data delivered with a record-change notification.
pub type EventContext = Map<String, Value>;

/// Set on after-save events: `true` for inserts, `false` for updates.
pub const CREATED_KEY: &str = "created";

/// Name of the channel that produced the event.
pub const SIGNAL_KEY: &str = "signal";

/// Reads the `created` flag, treating a missing or non-boolean value as `false`.
pub fn was_created(context: &EventContext) -> bool {
    context
        .get(CREATED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Shallow merge where keys from `overlay` win.
pub fn merge(base: &EventContext, overlay: &EventContext) -> EventContext {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
