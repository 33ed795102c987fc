use std::net::IpAddr;
use thiserror::Error;

/// Which side of a probe a failure points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The target answered, but with a throttling or server-side status (429 / 5xx).
    TargetOutage,
    /// Bind, connect, timeout or any other non-200 outcome for this endpoint.
    EndpointRejected,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Invalid range '{spec}': {reason}")]
    InvalidRange { spec: String, reason: String },

    #[error("No probe target available ({tried} candidates tried)")]
    NoTargetAvailable { tried: usize },

    #[error("Probe from {endpoint} failed ({kind:?}): {reason}")]
    Probe {
        endpoint: IpAddr,
        kind: FailureKind,
        reason: String,
    },

    #[error("No usable address ranges in input")]
    NoInput,

    #[error("{0}")]
    Custom(String),
}

impl ScanError {
    pub fn probe(endpoint: IpAddr, kind: FailureKind, reason: impl Into<String>) -> Self {
        ScanError::Probe {
            endpoint,
            kind,
            reason: reason.into(),
        }
    }

    /// Failure kind for per-endpoint errors; anything else counts as an endpoint rejection.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ScanError::Probe { kind, .. } => *kind,
            _ => FailureKind::EndpointRejected,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
