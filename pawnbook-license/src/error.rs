//! Error types for the licensing module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Licensing-specific errors raised below the service boundary.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Network error talking to the authority or a probe endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// The authority answered but refused or failed the request.
    #[error("authority error: {0}")]
    Authority(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Encryption or key derivation error.
    #[error("crypto error: {0}")]
    Crypto(#[from] pawnbook_crypto::CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The hardware probe is missing or does not support the request.
    #[error("hardware probe unavailable: {0}")]
    ProbeUnavailable(String),

    /// A persistence channel cannot be used right now.
    #[error("persistence channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// A background task was cancelled before completing.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl LicenseError {
    /// Maps the error to the nearest entry of the caller-facing taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkUnreachable,
            Self::Authority(_) => ErrorKind::AuthorityError,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns true for failures that mean "could not reach the authority".
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Authority(_))
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Machine-readable reason attached to a failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No remote record carries the key.
    NotFound,
    /// The record's status is not `active`.
    Inactive,
    /// The record's expiry date has passed.
    Expired,
    /// The license is bound to a different machine.
    MachineBoundElsewhere,
    /// No usable local record exists.
    NoLocalLicense,
    /// The local record belongs to a different key.
    LicenseMismatch,
    /// The local record failed tamper or machine checks.
    InvalidLocalLicense,
    /// The network or authority endpoint could not be reached.
    NetworkUnreachable,
    /// The authority returned an error.
    AuthorityError,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Returns the snake_case wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::MachineBoundElsewhere => "machine_bound_elsewhere",
            Self::NoLocalLicense => "no_local_license",
            Self::LicenseMismatch => "license_mismatch",
            Self::InvalidLocalLicense => "invalid_local_license",
            Self::NetworkUnreachable => "network_unreachable",
            Self::AuthorityError => "authority_error",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
