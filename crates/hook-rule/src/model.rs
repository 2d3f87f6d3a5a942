use chrono::{DateTime, Utc};
use hook_core::Channel;
use hook_types::{EntityType, EventContext};
use serde::{Deserialize, Serialize};

pub type ActionId = u64;
pub type RuleId = u64;

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Rhai statements run with `instance` in scope
    InlineScript,
    /// Dotted path of a function in the callable registry
    NamedFunctionReference,
    /// Dotted path of a task in the callable registry
    QueuedTaskReference,
}

/// 服务端动作定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// 动作 ID（0 表示尚未保存）
    #[serde(default)]
    pub id: ActionId,

    pub name: String,

    pub kind: ActionKind,

    /// 脚本文本或点分引用
    pub body: String,

    /// Merged into the context handed to functions and tasks
    #[serde(default)]
    pub context: EventContext,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for ActionDefinition {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            kind: ActionKind::InlineScript,
            body: String::new(),
            context: EventContext::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl ActionDefinition {
    pub fn inline_script(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::InlineScript,
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn function(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::NamedFunctionReference,
            body: reference.into(),
            ..Default::default()
        }
    }

    pub fn task(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::QueuedTaskReference,
            body: reference.into(),
            ..Default::default()
        }
    }
}

/// 触发条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    #[serde(rename = "on_creation")]
    OnCreate,
    #[serde(rename = "on_update")]
    OnUpdate,
    #[serde(rename = "on_deletion")]
    OnDelete,
}

impl TriggerKind {
    /// Bus channel a rule with this trigger listens on.
    pub fn channel(&self) -> Channel {
        match self {
            TriggerKind::OnCreate | TriggerKind::OnUpdate => Channel::AfterSave,
            TriggerKind::OnDelete => Channel::AfterDelete,
        }
    }

    /// Whether an event from `channel` with the given `created` flag fires
    /// this trigger. After-save events share a channel, so creations and
    /// updates are told apart here.
    pub fn matches(&self, channel: Channel, was_created: Option<bool>) -> bool {
        match (self, channel) {
            (TriggerKind::OnCreate, Channel::AfterSave) => was_created == Some(true),
            (TriggerKind::OnUpdate, Channel::AfterSave) => was_created != Some(true),
            (TriggerKind::OnDelete, Channel::AfterDelete) => true,
            _ => false,
        }
    }
}

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// 规则 ID（0 表示尚未保存）
    #[serde(default)]
    pub id: RuleId,

    pub name: String,

    pub trigger: TriggerKind,

    pub action_id: ActionId,

    /// 目标实体类型
    pub entity: EntityType,

    /// Rhai expression over `instance`; the action runs only if it is true
    #[serde(default)]
    pub guard: Option<String>,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(
        name: impl Into<String>,
        trigger: TriggerKind,
        action_id: ActionId,
        entity: EntityType,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            trigger,
            action_id,
            entity,
            guard: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Blank guards count as absent.
    pub fn guard_expression(&self) -> Option<&str> {
        self.guard.as_deref().filter(|g| !g.trim().is_empty())
    }

    pub fn handler_id(&self) -> String {
        crate::binding::handler_id(self.id)
    }
}
