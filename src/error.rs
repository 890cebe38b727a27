use thiserror::Error;

/// Terminal failures of the upstream completion stream.
///
/// None of these are retried here; the request ends with a single `error`
/// event carrying [`UpstreamError::kind`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("upstream connection failed: {0}")]
    Connection(String),

    #[error("upstream rate limit exceeded")]
    RateLimited,

    #[error("upstream authentication failed")]
    AuthFailed,

    #[error("upstream rejected the request: {0}")]
    BadRequest(String),

    #[error("upstream error: {0}")]
    Generic(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connection(_) => "connection_error",
            UpstreamError::RateLimited => "rate_limited",
            UpstreamError::AuthFailed => "auth_failed",
            UpstreamError::BadRequest(_) => "bad_request",
            UpstreamError::Generic(_) => "upstream_error",
        }
    }

    /// Classify a non-success HTTP status returned when opening the stream.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        match status {
            429 => UpstreamError::RateLimited,
            401 | 403 => UpstreamError::AuthFailed,
            400 | 404 | 422 => UpstreamError::BadRequest(format!("status {status}: {snippet}")),
            _ => UpstreamError::Generic(format!("status {status}: {snippet}")),
        }
    }

    /// Classify an error event emitted inside an already open stream.
    pub fn from_event(code: Option<&str>, message: &str) -> Self {
        match code.unwrap_or_default() {
            "rate_limit_exceeded" | "rate_limited" => UpstreamError::RateLimited,
            "invalid_api_key" | "unauthorized" | "authentication_error" => {
                UpstreamError::AuthFailed
            }
            "invalid_request_error" | "invalid_prompt" | "bad_request" => {
                UpstreamError::BadRequest(message.to_string())
            }
            "server_error" | "connection_error" => UpstreamError::Connection(message.to_string()),
            _ => UpstreamError::Generic(message.to_string()),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return UpstreamError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_connect() || err.is_timeout() || err.is_request() {
            UpstreamError::Connection(err.to_string())
        } else {
            UpstreamError::Generic(err.to_string())
        }
    }
}

/// A single tool invocation failed. Never fatal to the surrounding stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("unknown tool: `{0}`")]
    UnknownTool(String),

    #[error("tool `{tool}` failed: {message}")]
    Execution { tool: String, message: String },
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("no confidence log entry for continuation id `{0}`")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(UpstreamError::from_status(429, ""), UpstreamError::RateLimited);
        assert_eq!(UpstreamError::from_status(401, ""), UpstreamError::AuthFailed);
        assert_eq!(UpstreamError::from_status(403, ""), UpstreamError::AuthFailed);
        assert!(matches!(
            UpstreamError::from_status(400, "bad model"),
            UpstreamError::BadRequest(m) if m.contains("bad model")
        ));
        assert!(matches!(
            UpstreamError::from_status(502, ""),
            UpstreamError::Generic(_)
        ));
    }

    #[test]
    fn stream_error_codes_map_to_taxonomy() {
        assert_eq!(
            UpstreamError::from_event(Some("rate_limit_exceeded"), "slow down"),
            UpstreamError::RateLimited
        );
        assert_eq!(
            UpstreamError::from_event(None, "boom"),
            UpstreamError::Generic("boom".to_string())
        );
        assert_eq!(UpstreamError::RateLimited.kind(), "rate_limited");
    }
}
