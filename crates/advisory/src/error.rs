use std::fmt;
use thiserror::Error;

/// Why a single provider attempt did not produce a usable reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider is not configured: {0}")]
    NotConfigured(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unreadable response: {0}")]
    InvalidBody(String),

    #[error("empty reply")]
    EmptyReply,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else if err.is_decode() {
            Self::InvalidBody(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A failed attempt, attributed to its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdvisoryError {
    #[error("no advisory providers configured")]
    NoProviders,

    #[error("all {} advisory providers failed: {}", .failures.len(), join_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregated_error_names_every_provider() {
        let err = AdvisoryError::AllProvidersFailed {
            failures: vec![
                ProviderFailure {
                    provider: "primary".to_string(),
                    error: ProviderError::Timeout { secs: 60 },
                },
                ProviderFailure {
                    provider: "backup".to_string(),
                    error: ProviderError::Status {
                        status: 503,
                        body: "overloaded".to_string(),
                    },
                },
            ],
        };
        let display = err.to_string();
        assert!(display.starts_with("all 2 advisory providers failed"));
        assert!(display.contains("primary: timed out after 60s"));
        assert!(display.contains("backup: HTTP 503: overloaded"));
    }
}
