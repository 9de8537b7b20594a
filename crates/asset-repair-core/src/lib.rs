pub mod classify;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod index;
pub mod manifest;
pub mod migrate;
pub mod model;
pub mod platform;
pub mod progress;
pub mod redundant;
pub mod scheduler;

pub use config::AppConfig;
pub use control::CancelToken;
pub use engine::{RepairEngine, RepairReport};
pub use error::{Error, FaultCategory, FaultSink};
pub use model::{AssetDescriptor, AssetEntry, RepairKind, VerificationState};
pub use progress::{ProgressSnapshot, RepairReporter, SilentReporter};
