//! Identity types shared by every layer: which remote file, which group, which
//! service.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::ComposeError;

/// Flat key/value content of one file, as parsed by the backend client.
pub type Properties = HashMap<String, String>;

/// Identifies one remote configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigFileMetadata {
    pub namespace: String,
    pub group: String,
    pub file_name: String,
}

impl ConfigFileMetadata {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            file_name: file_name.into(),
        }
    }

    pub fn group_metadata(&self) -> GroupMetadata {
        GroupMetadata::new(&self.namespace, &self.group)
    }

    /// Validates the file extension.
    pub fn format(&self) -> Result<FileFormat, ComposeError> {
        FileFormat::from_file_name(&self.file_name)
    }
}

impl fmt::Display for ConfigFileMetadata {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.group, self.file_name)
    }
}

/// Identifies one backend-side file group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub namespace: String,
    pub group: String,
}

impl GroupMetadata {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for GroupMetadata {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.group)
    }
}

/// The running service whose internal files are loaded.
///
/// Internal files live in `namespace`, under a group named after the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub namespace: String,
    pub service: String,
}

impl ServiceIdentity {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }

    pub fn internal_file(
        &self,
        file_name: impl Into<String>,
    ) -> ConfigFileMetadata {
        ConfigFileMetadata::new(&self.namespace, &self.service, file_name)
    }
}

/// Supported remote file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Properties,
    Yaml,
}

impl FileFormat {
    /// Extensions in the order internal files are probed.
    pub const EXTENSIONS: [&'static str; 3] = ["properties", "yml", "yaml"];

    pub fn from_file_name(file_name: &str) -> Result<Self, ComposeError> {
        let unsupported = || ComposeError::UnsupportedFileFormat {
            file_name: file_name.to_string(),
        };
        let (_, ext) = file_name.rsplit_once('.').ok_or_else(unsupported)?;
        match ext {
            "properties" => Ok(FileFormat::Properties),
            "yml" | "yaml" => Ok(FileFormat::Yaml),
            _ => Err(unsupported()),
        }
    }
}
