/* src/error.rs */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;
use tracing::error;

/// Everything that stops a request short of the upstream.
///
/// Each variant maps to one HTTP answer; the conversion happens in
/// `into_response` so handlers can just `?` their way out.
#[derive(Debug)]
pub enum GateError {
    /// A rate-limited route, but the request satisfied none of its
    /// identification schemes.
    SignatureUnavailable,
    /// An identification header was present but its validator rejected it.
    ValidationFailed { code: StatusCode, message: String },
    /// No parseable client IP on a route that identifies callers by IP.
    InvalidIp,
    /// A route with an empty rate table; a configuration bug.
    NoRatesOnRoute { pattern: String },
    /// The caller's bucket ran dry.
    RateLimited { retry_after_secs: u64 },
    /// The upstream could not be reached or produced no response.
    Upstream(anyhow::Error),
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::SignatureUnavailable => StatusCode::UNAUTHORIZED.into_response(),
            GateError::ValidationFailed { code, message } => (code, message).into_response(),
            GateError::InvalidIp => {
                (StatusCode::BAD_REQUEST, "invalid IP".to_string()).into_response()
            }
            GateError::NoRatesOnRoute { pattern } => {
                error!(pattern = %pattern, "route has no rate schemes defined");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            GateError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after_secs.to_string())],
                format!("Rate limited. Try again in {retry_after_secs} seconds"),
            )
                .into_response(),
            GateError::Upstream(e) => {
                error!(error = %e, "upstream request failed");
                (StatusCode::BAD_GATEWAY, "Upstream server error".to_string()).into_response()
            }
        }
    }
}

/// An invalid [`Config`](crate::Config), with every problem found.
///
/// Validation keeps going after the first issue so a broken deployment gets
/// one complete report instead of a fix-rerun loop.
#[derive(Debug)]
pub struct ConfigError {
    problems: Vec<String>,
}

impl ConfigError {
    pub(crate) fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid configuration:")?;
        for problem in &self.problems {
            writeln!(f, "  - {problem}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}
