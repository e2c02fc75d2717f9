use serde::Deserialize;
use serde::Serialize;

/// How a change batch picks its refresh strategy
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Coarse keys force a whole reload, everything else is patched in place
    #[default]
    Reflect,
    /// Every batch triggers a whole reload
    WholeReload,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefreshConfig {
    /// When false, snapshots are still patched but nothing is refreshed
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,

    #[serde(default)]
    pub mode: RefreshMode,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_refresh: default_auto_refresh(),
            mode: RefreshMode::default(),
        }
    }
}

fn default_auto_refresh() -> bool {
    true
}
