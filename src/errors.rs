//! Configuration Propagation Error Hierarchy
//!
//! Defines the error types of the propagation engine, categorized by the
//! stage that produced them: composition at startup, change dispatch, and
//! binding application.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Engine settings failed to load or validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Startup composition failures
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Change dispatch failures for one subscription
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Applying a value to a single binding failed
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Config backend client failures
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Host framework reload primitive failed
    #[error("Host reload failed: {0}")]
    HostReload(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the error must abort process startup.
    ///
    /// Everything else is logged and the process keeps running on
    /// stale configuration.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_) | Error::Fatal(_) => true,
            Error::Compose(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// File extension is not one of properties/yml/yaml
    #[error("Unsupported config file format: {file_name}")]
    UnsupportedFileFormat { file_name: String },

    /// Connectivity check against the backend failed
    #[error("Config backend unreachable: {0}")]
    BackendUnreachable(String),

    /// A custom extension source failed to load
    #[error("Extension source {name} failed: {reason}")]
    Extension { name: String, reason: String },

    /// Fetching a file or group from the backend failed
    #[error("Failed to fetch {target} from backend")]
    Fetch {
        target: String,
        #[source]
        source: BackendError,
    },
}

impl ComposeError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ComposeError::UnsupportedFileFormat { .. } | ComposeError::BackendUnreachable(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Subscription queue receiver is gone
    #[error("Subscription queue for {0} is closed")]
    QueueClosed(String),

    /// A change arrived for a file the source does not track
    #[error("File {file} is not part of source {source_name}")]
    UnknownFile { file: String, source_name: String },

    /// Listener registration on a newly discovered group member failed
    #[error("Failed to subscribe {file}: {reason}")]
    Subscribe { file: String, reason: String },

    /// Processing panicked; caught at the worker boundary
    #[error("Change processing panicked for {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// A `${key}` placeholder without default resolved to nothing
    #[error("Could not resolve placeholder '{0}'")]
    UnresolvablePlaceholder(String),

    /// Placeholder syntax is broken, e.g. `${key` without closing brace
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),

    /// Value could not be converted to the target type
    #[error("Cannot convert '{value}' for {member}: {reason}")]
    Coercion {
        member: String,
        value: String,
        reason: String,
    },

    /// User setter reported a failure
    #[error("Setter {member} failed: {reason}")]
    Setter { member: String, reason: String },

    /// User setter panicked
    #[error("Setter {0} panicked")]
    SetterPanicked(String),

    /// Bound target has been dropped
    #[error("Target of {0} is no longer alive")]
    TargetDropped(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Namespace/group/file cannot be served
    #[error("Backend cannot serve {0}")]
    NotAvailable(String),

    /// Transport-level failure reported by the client
    #[error("Backend client error: {0}")]
    Client(String),
}
