//! Error types shared across the deployment surface.

use thiserror::Error;

/// A non-success response from the management or SCM plane.
///
/// Carried inside [`anyhow::Error`] so call sites can classify failures by
/// status code with `downcast_ref`: a 404 routes "needs create" decisions,
/// a 400 drives the trigger-sync warm-up retry.
#[derive(Debug, Error)]
#[error("api responded with status {status}: {body}")]
pub struct ApiError {
    pub status: u16,
    pub body: String,
}

/// A long-running operation outlived the caller's deadline.
///
/// Reported distinctly from a remote failure so a cancelled wait is never
/// mistaken for a terminal operation error.
#[derive(Debug, Error)]
#[error("{operation} did not complete before the deadline")]
pub struct PollTimeout {
    pub operation: String,
}

/// True when `err` is an [`ApiError`] with the given status code.
pub fn has_status(err: &anyhow::Error, status: u16) -> bool {
    err.downcast_ref::<ApiError>()
        .is_some_and(|api| api.status == status)
}
