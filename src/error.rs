//! Error kinds surfaced by the client.
//!
//! Operations return `anyhow::Result`; callers that need to react to a
//! specific failure recover it with `err.downcast_ref::<SimbaError>()`.

use std::fmt;

/// Distinguishable failures of the request pipeline and the validator.
#[derive(Debug)]
pub enum SimbaError {
    /// Settings are missing or inconsistent
    Config(String),
    /// The base URL could not be parsed; raised before any network attempt
    InvalidUrl(String),
    /// The auth provider rejected the token exchange
    Authentication { status: Option<u16>, body: String },
    /// Terminal non-2xx response, after any retries
    Request { status: u16, url: String, body: String },
    /// Network failure that outlived the retry budget
    Transport { url: String, source: anyhow::Error },
    /// Method arguments do not match the declared ABI shape
    Validation { path: String, message: String },
}

impl SimbaError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        SimbaError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SimbaError::Authentication { status, .. } => *status,
            SimbaError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for SimbaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimbaError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SimbaError::InvalidUrl(msg) => {
                write!(
                    f,
                    "Invalid URL: {}. Check that SIMBA_API_BASE_URL is configured.",
                    msg
                )
            }
            SimbaError::Authentication { status, body } => match status {
                Some(status) => write!(f, "Authentication failed (HTTP {}): {}", status, body),
                None => write!(f, "Authentication failed: {}", body),
            },
            SimbaError::Request { status, url, body } => {
                write!(f, "Request to {} failed with HTTP {}: {}", url, status, body)
            }
            SimbaError::Transport { url, source } => {
                write!(f, "Request to {} failed: {:#}", url, source)
            }
            SimbaError::Validation { path, message } => {
                write!(f, "Invalid parameter '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for SimbaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimbaError::Transport { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_kind() {
        let err = SimbaError::InvalidUrl("relative URL without a base".to_string());
        assert!(err.to_string().contains("SIMBA_API_BASE_URL"));

        let err = SimbaError::Request {
            status: 404,
            url: "http://localhost/v2/apps/".to_string(),
            body: "missing".to_string(),
        };
        assert!(err.to_string().contains("HTTP 404"));
        assert_eq!(err.status(), Some(404));

        let err = SimbaError::validation("person.addr", "expected an object");
        assert!(err.to_string().contains("person.addr"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_transport_error_exposes_source() {
        use std::error::Error;

        let err = SimbaError::Transport {
            url: "http://localhost".to_string(),
            source: anyhow::anyhow!("connection reset"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err = anyhow::Error::from(SimbaError::Authentication {
            status: Some(401),
            body: "invalid_client".to_string(),
        });
        let simba = err.downcast_ref::<SimbaError>().unwrap();
        assert!(matches!(simba, SimbaError::Authentication { .. }));
        assert_eq!(simba.status(), Some(401));
    }
}
