use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BackendConfig {
    /// Check backend connectivity before composing; failure aborts startup
    #[serde(default)]
    pub check_address: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Capacity of each per-subscription event queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Retries when fetching a file newly added to a group
    #[serde(default)]
    pub fetch_retry: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            fetch_retry: BackoffPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "dispatcher.queue_size must be greater than 0".into(),
            )));
        }
        self.fetch_retry.validate()
    }
}

fn default_queue_size() -> usize {
    256
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Interval between sweeps of dead bindings (milliseconds)
    #[serde(default = "default_sweep_interval_in_ms")]
    pub sweep_interval_in_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_in_ms: default_sweep_interval_in_ms(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "registry.sweep_interval_in_ms must be at least 1ms".into(),
            )));
        }
        Ok(())
    }
}

fn default_sweep_interval_in_ms() -> u64 {
    5000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config(ConfigError::Message(
                "fetch_retry.max_retries must be at least 1".into(),
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "fetch_retry.base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }
        Ok(())
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_timeout_ms() -> u64 {
    3000
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
