pub mod entity;
pub mod event;
pub mod record;

pub use entity::EntityType;
pub use event::{EventContext, CREATED_KEY, SIGNAL_KEY};
pub use record::{Record, RecordId};
