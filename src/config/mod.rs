//! Configuration management for the propagation engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod composer;
mod refresh;
mod runtime;
pub use composer::*;
pub use refresh::*;
pub use runtime::*;

#[cfg(test)]
mod config_test;

use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix of environment overrides, e.g. `MESHCONF__REFRESH__MODE`.
pub const ENV_PREFIX: &str = "MESHCONF";

/// Main configuration container of the engine
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file (explicit path, else `MESHCONF_CONFIG_PATH`)
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// Backend client behavior at startup
    #[serde(default)]
    pub backend: BackendConfig,
    /// Which files and groups make up the snapshot
    #[serde(default)]
    pub composer: ComposerConfig,
    /// Refresh strategy selection
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Change dispatch queues
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Binding registry housekeeping
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Debug for EngineConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("refresh", &self.refresh)
            .field("composer", &self.composer)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. `path` if given, else the file named by `MESHCONF_CONFIG_PATH` (if set)
    /// 3. Environment variables with `MESHCONF__` prefix (highest priority)
    ///
    /// # Example
    /// ```ignore
    /// let cfg = EngineConfig::load(Some("config/meshconf.toml"))?.validate()?;
    /// ```
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let file = path
            .map(str::to_string)
            .or_else(|| env::var(format!("{ENV_PREFIX}_CONFIG_PATH")).ok());
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(&file).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.composer.validate()?;
        self.dispatcher.validate()?;
        self.registry.validate()?;
        Ok(self)
    }
}
