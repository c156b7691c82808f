//! Client errors
//!
//! A call fails in one of three places: on the way to the orchestrator, at
//! the orchestrator (an error status with a JSON `error` message), or while
//! decoding a successful answer.

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to orchestrator failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("orchestrator answered {status}: {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// Error for a non-2xx answer; the body's `error` field is preferred over
    /// the raw body when present
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        Self::Rejected { status, message }
    }

    /// Status the orchestrator answered with, if it answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::Decode(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// A concurrent change won; the same call may succeed once re-issued
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }

    /// The record refuses the call in its current status
    pub fn is_refused(&self) -> bool {
        self.status() == Some(StatusCode::UNPROCESSABLE_ENTITY)
    }

    /// The cloud provider, bus or task queue behind the orchestrator failed
    pub fn is_upstream(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_error_field_becomes_the_message() {
        let err = ClientError::from_body(StatusCode::NOT_FOUND, r#"{"error":"pipeline x not found"}"#);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "orchestrator answered 404 Not Found: pipeline x not found"
        );

        let err = ClientError::from_body(StatusCode::BAD_GATEWAY, "Bad Gateway\n");
        assert!(err.is_upstream());
        assert!(matches!(err, ClientError::Rejected { ref message, .. } if message == "Bad Gateway"));
    }

    #[test]
    fn test_statuses_follow_orchestrator_mapping() {
        let cases: [(StatusCode, fn(&ClientError) -> bool); 4] = [
            (StatusCode::CONFLICT, ClientError::is_conflict),
            (StatusCode::UNPROCESSABLE_ENTITY, ClientError::is_refused),
            (StatusCode::UNAUTHORIZED, ClientError::is_unauthorized),
            (StatusCode::SERVICE_UNAVAILABLE, ClientError::is_upstream),
        ];
        for (status, check) in cases {
            let err = ClientError::from_body(status, "{}");
            assert!(check(&err), "{} not classified", status);
            assert!(!err.is_not_found());
        }

        let decode = ClientError::Decode("missing field `id`".to_string());
        assert_eq!(decode.status(), None);
        assert!(!decode.is_upstream());
    }
}
