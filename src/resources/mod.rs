//! Typed builders for the resources making up one challenge instance.
//!
//! An instance is a namespace holding exactly one deployment and one service, both
//! named [`WORKLOAD_NAME`]. Deleting the namespace reclaims all of it.

use crate::date_time::DateTime;
use crate::types::ChallengeConfig;

pub mod deployment;
pub mod labels;
pub mod namespace;
pub mod service;

/// Name of the deployment, its container and the service in every instance namespace
pub const WORKLOAD_NAME: &str = "challenge";

/// Everything the builders need to describe one instance
#[derive(Clone, Debug)]
pub struct InstanceSpec {
    pub namespace: String,
    pub challenge_id: String,
    pub candidate_id: String,
    pub username: String,
    pub expires_at: DateTime,
    pub config: ChallengeConfig,
    pub service_type: String,
}
