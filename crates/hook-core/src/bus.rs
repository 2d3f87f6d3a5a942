use crate::error::{CoreError, Result};
use hook_types::{EntityType, EventContext, Record, CREATED_KEY, SIGNAL_KEY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

/// Notification channels published for every registered entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Fired after a record is inserted or updated; carries `created`.
    AfterSave,
    /// Fired after a record is removed.
    AfterDelete,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::AfterSave, Channel::AfterDelete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::AfterSave => "after_save",
            Channel::AfterDelete => "after_delete",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to subscribers. Handlers may modify the record; the
/// changes are visible to the caller that triggered the notification.
pub struct RecordEvent<'a> {
    pub channel: Channel,
    pub record: &'a mut Record,
    pub context: EventContext,
}

impl RecordEvent<'_> {
    /// `None` on the delete channel.
    pub fn was_created(&self) -> Option<bool> {
        match self.channel {
            Channel::AfterSave => Some(hook_types::event::was_created(&self.context)),
            Channel::AfterDelete => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&mut RecordEvent<'_>) -> anyhow::Result<()> + Send + Sync>;

type HandlerTable = Arc<Mutex<Vec<(String, Handler)>>>;

/// Synchronous, in-process notification bus.
///
/// Each (entity type, channel) pair owns its own handler table behind a
/// mutex. Subscribing under an existing handler id replaces that handler in
/// place, keeping its position in delivery order.
#[derive(Default)]
pub struct NotificationBus {
    channels: RwLock<HashMap<(EntityType, Channel), HandlerTable>>,
}

pub type SharedBus = Arc<NotificationBus>;

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the channels for an entity type. Registering twice is a no-op.
    pub fn register_entity(&self, entity: &EntityType) -> Result<()> {
        let mut channels = self.channels.write()?;
        for channel in Channel::ALL {
            channels
                .entry((entity.clone(), channel))
                .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        }
        debug!(entity = %entity, "Entity channels registered");
        Ok(())
    }

    pub fn is_registered(&self, entity: &EntityType) -> bool {
        match self.channels.read() {
            Ok(channels) => channels.contains_key(&(entity.clone(), Channel::AfterSave)),
            Err(_) => false,
        }
    }

    /// Registers `handler` under `handler_id`. Returns true if an existing
    /// handler was replaced.
    pub fn subscribe(
        &self,
        entity: &EntityType,
        channel: Channel,
        handler_id: &str,
        handler: Handler,
    ) -> Result<bool> {
        let table = self.table(entity, channel)?;
        let mut handlers = table.lock()?;

        let replaced = match handlers.iter_mut().find(|(id, _)| id == handler_id) {
            Some(slot) => {
                slot.1 = handler;
                true
            }
            None => {
                handlers.push((handler_id.to_string(), handler));
                false
            }
        };

        debug!(entity = %entity, channel = %channel, handler_id = %handler_id, replaced, "Handler subscribed");
        Ok(replaced)
    }

    /// Removes the handler under `handler_id`. Returns false when nothing
    /// was subscribed under that id.
    pub fn unsubscribe(&self, entity: &EntityType, channel: Channel, handler_id: &str) -> Result<bool> {
        let table = self.table(entity, channel)?;
        let mut handlers = table.lock()?;

        let before = handlers.len();
        handlers.retain(|(id, _)| id != handler_id);
        let removed = handlers.len() != before;

        if removed {
            debug!(entity = %entity, channel = %channel, handler_id = %handler_id, "Handler unsubscribed");
        }
        Ok(removed)
    }

    /// Delivers an event to every handler of the channel, in registration
    /// order. The first handler error stops delivery and is returned as is.
    ///
    /// The handler list is snapshotted before delivery, so handlers may
    /// publish (or subscribe) on the same channel without deadlocking.
    pub fn publish(
        &self,
        channel: Channel,
        record: &mut Record,
        created: Option<bool>,
        extra: EventContext,
    ) -> anyhow::Result<usize> {
        let entity = record.entity.clone();
        let snapshot: Vec<(String, Handler)> = {
            let table = self.table(&entity, channel)?;
            let handlers = table.lock().map_err(CoreError::from)?;
            handlers.clone()
        };

        let mut context = extra;
        context.insert(SIGNAL_KEY.to_string(), channel.as_str().into());
        if let (Channel::AfterSave, Some(created)) = (channel, created) {
            context.insert(CREATED_KEY.to_string(), created.into());
        }

        let mut event = RecordEvent {
            channel,
            record,
            context,
        };

        for (handler_id, handler) in &snapshot {
            trace!(entity = %entity, channel = %channel, handler_id = %handler_id, "Delivering event");
            handler(&mut event)?;
        }

        Ok(snapshot.len())
    }

    pub fn handler_ids(&self, entity: &EntityType, channel: Channel) -> Vec<String> {
        let table = match self.table(entity, channel) {
            Ok(table) => table,
            Err(_) => return Vec::new(),
        };
        let ids = match table.lock() {
            Ok(handlers) => handlers.iter().map(|(id, _)| id.clone()).collect(),
            Err(e) => {
                tracing::error!("Failed to acquire handler lock in handler_ids: {}", e);
                Vec::new()
            }
        };
        ids
    }

    pub fn is_subscribed(&self, entity: &EntityType, channel: Channel, handler_id: &str) -> bool {
        self.handler_ids(entity, channel).iter().any(|id| id == handler_id)
    }

    fn table(&self, entity: &EntityType, channel: Channel) -> Result<HandlerTable> {
        let channels = self.channels.read()?;
        let table = channels.get(&(entity.clone(), channel)).cloned();
        table.ok_or_else(|| CoreError::UnknownEntity(entity.clone()))
    }
}
