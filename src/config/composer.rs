use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::FileFormat;
use crate::Result;

/// A user-declared group of files
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CustomGroupConfig {
    /// Defaults to the service namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// Group name on the backend
    pub name: String,

    /// Explicit ordered file list; empty means "the whole group"
    #[serde(default)]
    pub files: Vec<String>,
}

impl CustomGroupConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            files: Vec::new(),
        }
    }

    pub fn with_files<I, S>(
        mut self,
        files: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_namespace(
        mut self,
        namespace: impl Into<String>,
    ) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Environment variables identifying the deployment-mode bundles
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    #[serde(default = "default_application_id_env")]
    pub application_id_env: String,

    #[serde(default = "default_namespace_id_env")]
    pub namespace_id_env: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            application_id_env: default_application_id_env(),
            namespace_id_env: default_namespace_id_env(),
        }
    }
}

fn default_application_id_env() -> String {
    "MESHCONF_DEPLOY_APPLICATION_ID".to_string()
}

fn default_namespace_id_env() -> String {
    "MESHCONF_DEPLOY_NAMESPACE_ID".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ComposerConfig {
    /// Load `application*`/`bootstrap*` files of the service itself
    #[serde(default = "default_internal_enabled")]
    pub internal_enabled: bool,

    /// Stems of internal files, in precedence order
    #[serde(default = "default_internal_file_stems")]
    pub internal_file_stems: Vec<String>,

    #[serde(default)]
    pub custom_groups: Vec<CustomGroupConfig>,

    #[serde(default)]
    pub deployment: DeploymentConfig,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            internal_enabled: default_internal_enabled(),
            internal_file_stems: default_internal_file_stems(),
            custom_groups: Vec::new(),
            deployment: DeploymentConfig::default(),
        }
    }
}

impl ComposerConfig {
    /// Rejects unsupported custom file extensions up front.
    pub fn validate(&self) -> Result<()> {
        for group in &self.custom_groups {
            if group.name.trim().is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "composer.custom_groups[].name cannot be empty".into(),
                )));
            }
            for file in &group.files {
                FileFormat::from_file_name(file)?;
            }
        }
        Ok(())
    }
}

fn default_internal_enabled() -> bool {
    true
}

fn default_internal_file_stems() -> Vec<String> {
    vec!["application".to_string(), "bootstrap".to_string()]
}
