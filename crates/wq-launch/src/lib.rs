//! # wq-launch
//!
//! Client for the orchestration platform's REST API and the launcher that
//! turns a deployment profile into a submitted data-prep job.

pub mod client;
pub mod launcher;

pub use client::{
    find_hardware_tier, GitRef, HardwareTier, HardwareTierId, OrchestrationClient, OwnerId,
    ProjectId, RetryPolicy, RunRequest, SubmissionAck, API_KEY_HEADER,
};
pub use launcher::{build_run_request, launch};
