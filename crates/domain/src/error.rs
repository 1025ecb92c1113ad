/// Shared error type used across all Relay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Non-2xx response from a provider endpoint. The body is echoed verbatim.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Every provider in the pool failed for one request.
    #[error("all providers failed: {}", attempts.join("; "))]
    AllProvidersFailed { attempts: Vec<String> },

    #[error("cancelled")]
    Cancelled,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should trigger provider failover rather than
    /// surface to the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(Error::Api { status: 503, body: "overloaded".into() }.is_transient());
        assert!(Error::Api { status: 429, body: "rate limit".into() }.is_transient());
        assert!(Error::Timeout("120s".into()).is_transient());
        assert!(Error::Http("connection refused".into()).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!Error::Api { status: 401, body: "bad key".into() }.is_transient());
        assert!(!Error::Api { status: 400, body: "bad request".into() }.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn all_providers_failed_joins_attempts() {
        let e = Error::AllProvidersFailed {
            attempts: vec!["p0: HTTP 503".into(), "p1: timeout".into()],
        };
        assert_eq!(e.to_string(), "all providers failed: p0: HTTP 503; p1: timeout");
    }
}
