use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::NamedSource;
use crate::ComposeError;
use crate::ServiceIdentity;

/// What a custom extension contributes to composition.
#[derive(Debug)]
pub enum ExtensionOutcome {
    /// Sources are added and composition carries on
    Continue(Vec<NamedSource>),
    /// Sources are added and nothing after this extension is loaded
    ShortCircuit(Vec<NamedSource>),
}

/// A pluggable source loaded before any backend file.
///
/// Extension sources take precedence over every internal or custom file.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceExtension: Send + Sync + 'static {
    fn name(&self) -> String;

    async fn load(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<ExtensionOutcome, ComposeError>;
}
