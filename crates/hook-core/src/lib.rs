pub mod bus;
pub mod entity;
pub mod error;
pub mod store;

pub use bus::{Channel, Handler, NotificationBus, RecordEvent, SharedBus};
pub use entity::{EntityRegistry, EntityResolver, RecordSource};
pub use error::{CoreError, Result};
pub use store::RecordStore;
