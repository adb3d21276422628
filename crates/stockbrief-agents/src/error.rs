use std::time::Duration;

use stockbrief_models::report_request::RequestError;
use stockbrief_models::section::SectionKind;
use thiserror::Error;

/// Failure of a single request to the model provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Rate limited by provider: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Provider error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Minimum wait requested by the provider before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failure surfaced by the gateway after its retry policy has run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("Timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Provider unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Gateway is shut down")]
    Closed,
}

impl GatewayError {
    /// Classify the final transport error once no further attempts will be made.
    pub fn from_transport(error: TransportError, attempts: u32) -> Self {
        match error {
            TransportError::RateLimited { message, .. } => Self::RateLimited { attempts, message },
            TransportError::Timeout(_) => Self::Timeout { attempts },
            TransportError::Server { status, message } => Self::Unavailable {
                attempts,
                message: format!("HTTP {status}: {message}"),
            },
            TransportError::Network(message) => Self::Unavailable { attempts, message },
            TransportError::Auth(message) => Self::Auth(message),
            TransportError::InvalidRequest(message) => Self::InvalidRequest(message),
            TransportError::UnexpectedResponse(message) => Self::UnexpectedResponse(message),
        }
    }

    /// Number of provider calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RateLimited { attempts, .. }
            | Self::Timeout { attempts }
            | Self::Unavailable { attempts, .. } => *attempts,
            Self::Closed => 0,
            _ => 1,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Section {section} is missing required context: {field}")]
    MissingContext {
        section: SectionKind,
        field: &'static str,
    },

    #[error("Unknown template {template} for section {section}")]
    UnknownTemplate {
        section: SectionKind,
        template: String,
    },
}

/// Raised by the data-fetch collaborator when no snapshot can be produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Market data unavailable for {ticker}: {reason}")]
pub struct DataUnavailable {
    pub ticker: String,
    pub reason: String,
}

/// Failures that stop a report from being produced at all.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid report request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailable),

    #[error("Model provider rejected credentials: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(TransportError::Server {
            status: 529,
            message: "overloaded".to_string()
        }
        .is_transient());
        assert!(!TransportError::Auth("bad key".to_string()).is_transient());
        assert!(!TransportError::InvalidRequest("bad body".to_string()).is_transient());
    }

    #[test]
    fn exhausted_errors_keep_attempts() {
        let err = GatewayError::from_transport(
            TransportError::RateLimited {
                retry_after: None,
                message: "slow down".to_string(),
            },
            3,
        );
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.to_string(), "Rate limited after 3 attempts: slow down");

        let auth = GatewayError::from_transport(TransportError::Auth("nope".to_string()), 1);
        assert_eq!(auth, GatewayError::Auth("nope".to_string()));
        assert_eq!(auth.attempts(), 1);
    }
}
