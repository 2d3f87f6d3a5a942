pub mod binding;
pub mod engine;
pub mod error;
pub mod executor;
pub mod functions;
pub mod guard;
pub mod lifecycle;
pub mod loader;
pub mod model;
pub mod queue;
pub mod registry;
pub mod storage;

pub use binding::{handler_id, DispatchOutcome, RuleBinding, RuleDispatcher};
pub use engine::{RuleEngine, RuleEngineBuilder};
pub use error::RuleError;
pub use executor::{ActionExecutor, SharedActionsConfig};
pub use functions::{register_builtin_functions, register_script_functions};
pub use guard::RuleGuard;
pub use lifecycle::{RuleLifecycleManager, RuleStoreEvent, RuleStoreObserver};
pub use loader::{load_rules, DefinitionSet};
pub use model::{ActionDefinition, ActionId, ActionKind, RuleDefinition, RuleId, TriggerKind};
pub use queue::{TaskPayload, TaskQueue, TokioTaskQueue};
pub use registry::{CallableRegistry, NamedFunction, QueuedTask};
pub use storage::{DefinitionSource, DefinitionStore};
