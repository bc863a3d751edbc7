//! Transport-agnostic error kinds, per the error handling design: one enum renders
//! both the HTTP response body and the pre-receive hook's stderr envelope.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Not Found - Invalid repo path")]
    InvalidPath,
    #[error("Not Found - Unknown repo: {0}")]
    UnknownRepo(String),
    #[error("Internal Error - Failed to sync with upstream")]
    SyncFailed,
    #[error("Internal Server Error")]
    HandlerFailure,
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidPath | ProxyError::UnknownRepo(_) => StatusCode::NOT_FOUND,
            ProxyError::SyncFailed | ProxyError::HandlerFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

/// Formats the `PUSH REJECTED` envelope shared by the HTTP 500 forwarding-failure path
/// and the pre-receive hook's stderr, per the error handling design.
pub fn rejection_envelope(lines: &[String]) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&"=".repeat(50));
    out.push('\n');
    out.push_str("PUSH REJECTED\n");
    out.push_str(&"=".repeat(50));
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&"=".repeat(50));
    out.push('\n');
    out.push('\n');
    out
}

