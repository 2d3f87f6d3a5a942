use serde::{Deserialize, Serialize};

/// 全局配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub name: String,
    pub version: String,
}

/// 动作执行配置
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ActionsConfig {
    /// Hand queued-task actions to the task queue instead of running them
    /// inline.
    #[serde(default, alias = "CELERY_USE_ASYNC")]
    pub celery_use_async: bool,
}

/// 脚本引擎配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptConfig {
    /// 0 disables the limit.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// 默认值函数
fn default_max_operations() -> u64 {
    100_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "Hook Rule Service".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GlobalConfig {
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
