pub mod album;
pub mod classify;
pub mod dispatch;
pub mod driver;
pub mod filter;
pub mod model;
pub mod platform;
pub mod reply;
pub mod retry;
pub mod stats;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{classify, ContentKind};
pub use dispatch::{DispatchConfig, DispatchEngine};
pub use driver::{DriverConfig, Replicator, RunOutcome};
pub use filter::{ContentFilter, FilterRules, KindToggles};
pub use model::*;
pub use platform::*;
pub use retry::FloodWaitPolicy;
pub use stats::ReplicationStats;
pub use transform::{Replacement, SourceLink, TextTransformer};
