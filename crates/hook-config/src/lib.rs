pub mod global;
pub mod loader;

pub use global::{ActionsConfig, GlobalConfig, LoggingConfig, ScriptConfig, SystemConfig};
pub use loader::ConfigLoader;
