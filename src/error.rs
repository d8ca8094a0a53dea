use std::time::Duration;

use thiserror::Error;

/// Result type alias for every fallible operation of the crate.
pub type Result<T> = std::result::Result<T, EncephalonError>;

#[derive(Error, Debug)]
pub enum EncephalonError {
    /// A required environment variable is not set.
    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport level failure: connection refused, reset, timed out, or an
    /// undecodable response body.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The remote answered with a non-success status code.
    #[error("Remote request failed with status {status}: {body}")]
    RemoteRequest { status: u16, body: String },

    /// Scan creation was rejected by the remote, typically because the study
    /// has no DICOM attached.
    #[error("Scan submission failed with status {status}: {body}")]
    Submission { status: u16, body: String },

    #[error("Scan {scan_id} did not complete within {} seconds", .timeout.as_secs_f64())]
    PollTimeout { scan_id: String, timeout: Duration },

    #[error("Waiting for scan {scan_id} was cancelled")]
    Cancelled { scan_id: String },

    #[error("Malformed webhook payload: {0}")]
    MalformedWebhookPayload(String),

    #[error("Webhook signature is missing or does not match")]
    InvalidSignature,

    #[error("Scan {0} is not tracked by this receiver")]
    UntrackedScan(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(String),
}

impl EncephalonError {
    /// Status code of a remote rejection, if this error is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteRequest { status, .. } | Self::Submission { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether the failure happened below HTTP semantics and is worth trying
    /// again. A non-success response is never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}
