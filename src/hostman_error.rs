//! Error type shared by every reconciliation operation.
//!
//! Taxonomy:
//! - transport failures (`Http`, `Api`) are fatal to the running operation,
//! - decode failures (`Decode`, `MissingField`) are fatal,
//! - `ReadinessFailed` and `Timeout` are both fatal but kept distinct so the
//!   host can tell a remote-reported failure from a deadline expiry,
//! - the "already bound" API failure is the only one callers may suppress
//!   (see [`ReconcileError::is_already_bound`]).

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// API error code returned when a floating IP is already bound.
pub const ALREADY_BOUND_CODE: &str = "floating_ip_already_bound";

/// Error type for Hostman reconciliation operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Missing required environment variable.
    #[error("missing required env var: {0}")]
    MissingEnv(&'static str),

    /// Invalid environment variable value.
    #[error("invalid env var {key}={value:?}: {reason}")]
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The environment variable value.
        value: String,
        /// The reason for invalidity.
        reason: &'static str,
    },

    /// HTTP client error (connection, timeout, TLS).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx API response, body kept verbatim.
    #[error("hostman api error: status={status}, body={body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Request body could not be encoded.
    #[error("json encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Response body is not valid JSON or has an unexpected shape.
    #[error("json decode error ({context}): {source}")]
    Decode {
        /// What was being decoded.
        context: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A required key is absent from a response document.
    #[error("response is missing field `{field}` in {context}")]
    MissingField {
        /// What was being decoded.
        context: String,
        /// The missing key.
        field: &'static str,
    },

    /// Desired state is rejected before any remote call.
    #[error("invalid {resource} configuration: {reason}")]
    Validation {
        /// Resource type name.
        resource: &'static str,
        /// Human readable reason.
        reason: String,
    },

    /// Update asked to change a field the API cannot change in place.
    #[error("{resource}.{field} cannot be changed after creation")]
    ImmutableField {
        /// Resource type name.
        resource: &'static str,
        /// Field name.
        field: &'static str,
    },

    /// Remote resource reached a failure state while provisioning.
    #[error("{resource} {id} entered failure status {status:?}")]
    ReadinessFailed {
        /// Resource type name.
        resource: &'static str,
        /// Resource identifier.
        id: String,
        /// Observed remote status.
        status: String,
    },

    /// Polling deadline elapsed before a terminal state.
    #[error("timeout after {waited:?} waiting for {what}")]
    Timeout {
        /// What the poller was waiting for.
        what: String,
        /// Configured deadline.
        waited: Duration,
    },

    /// No reconciler is registered for the resource type.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// Record file could not be read or written.
    #[error("record file {path:?}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Operation requires a created resource but the record has no id.
    #[error("{0} record has no id (not created or already deleted)")]
    MissingId(&'static str),
}

impl ReconcileError {
    /// Whether this is a 404 from the API (resource no longer exists).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// Whether this is the API's "floating IP already bound" failure.
    #[must_use]
    pub fn is_already_bound(&self) -> bool {
        matches!(self, Self::Api { status, body } if *status >= 400 && body.contains(ALREADY_BOUND_CODE))
    }

    /// Whether the error came from the polling deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ReconcileError>;
