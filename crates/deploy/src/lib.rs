//! crumpet-deploy - Deployment library for Azure Function Apps.
//!
//! This crate drives code pushes (zip deploy or run-from-package),
//! infrastructure template deployments with what-if drift reports, and slot
//! traffic operations for a function app and its deployment slots.

pub mod auth;
pub mod client;
pub mod deploy;
pub mod diff;
pub mod error;
pub mod livestate;
pub mod manifest;
pub mod poll;
pub mod sas;
pub mod stages;
pub mod template;

pub use auth::Credential;
pub use client::{AzureClient, FunctionSnapshot, PublishCredentials};
pub use diff::DiffSummary;
pub use livestate::{
    HealthState, LiveState, ResourceState, SyncState, SyncStatus, get_function_state,
};
pub use manifest::{
    AppManifest, CRUMPET_MANIFEST_FILENAME, DeployTarget, DeployTemplate, FunctionManifest,
};
pub use stages::{
    StageStatus, SwapRequest, SyncRequest, execute_rollback, execute_swap, execute_sync,
};
