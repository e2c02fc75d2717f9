//! Dynamic configuration propagation.
//!
//! Loads remote configuration files into a running process, merges them in a
//! fixed precedence order, and turns backend pushes into either a whole
//! reload of the host or a targeted patch of already bound values.
//!
//! ```text
//! SnapshotComposer ──compose──> ConfigSnapshot <──apply── ChangeDispatcher <── backend pushes
//!                                     │                         │
//!                                     └──resolve──┐             ├─ ScopeIndex (coarse or fine?)
//!                                                 ▼             └─ RefreshStrategy
//!                                          BindingRegistry ◄────────┘
//! ```

mod backend;
mod binding;
mod config;
mod differ;
mod dispatcher;
mod engine;
mod errors;
mod metrics;
mod model;
mod refresh;
mod scope;
mod snapshot;
pub(crate) mod utils;

pub use backend::adaptors::mem::*;
pub use backend::*;
pub use binding::*;
pub use config::*;
pub use differ::*;
pub use dispatcher::*;
pub use engine::*;
pub use errors::*;
pub use metrics::*;
pub use model::*;
pub use refresh::*;
pub use scope::*;
pub use snapshot::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
