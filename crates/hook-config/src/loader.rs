use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::GlobalConfig;

/// Prefix for environment overrides, e.g. `HOOK_ACTIONS__CELERY_USE_ASYNC=true`.
pub const ENV_PREFIX: &str = "HOOK";

/// 配置加载器
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    pub fn global_path(&self) -> PathBuf {
        self.config_dir.join("global.toml")
    }

    /// 加载全局配置
    ///
    /// A missing `global.toml` yields the defaults; environment variables
    /// override either.
    pub fn load_global(&self) -> Result<GlobalConfig> {
        let config_path = self.global_path();

        let config = Config::builder()
            .add_source(
                File::new(
                    config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                    FileFormat::Toml,
                )
                .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let global = self.load_global()?;

        if global.system.name.trim().is_empty() {
            return Err(anyhow!("system.name cannot be empty"));
        }

        if global.logging.level.trim().is_empty() {
            return Err(anyhow!("logging.level cannot be empty"));
        }

        Ok(())
    }
}
