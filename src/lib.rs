pub mod backend;
pub mod cluster;
pub mod config;
pub mod connector;
pub mod date_time;
pub mod error;
pub mod image;
pub mod naming;
pub mod orchestrator;
pub mod record;
pub mod resources;
pub mod router;
pub mod status;
pub mod telemetry;
pub mod types;

pub use error::{Error, Result};
pub use orchestrator::InstanceOrchestrator;
pub use router::{BackendKind, BackendRouter};
