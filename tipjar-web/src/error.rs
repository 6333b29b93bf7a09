//! Error responses.
//!
//! Handlers return [`ApiError`], rendered as JSON. The response carries an
//! [`ErrorPage`] extension so the pipeline can re-render it as HTML for
//! non-JSON paths, and a [`ReportedError`] extension for server errors so the
//! pipeline can forward the cause to the error tracker.

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Cause of a 5xx response, for the error tracker.
#[derive(Debug, Clone)]
pub struct ReportedError(pub Arc<anyhow::Error>);

/// What an error response says, independent of its rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPage {
    pub code: u16,
    pub short: String,
    pub long: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error_code: u16,
    error_message_short: &'a str,
    error_message_long: &'a str,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    source: Option<Arc<anyhow::Error>>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// A 500 whose cause is kept for the error tracker, not shown to the client.
    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Sorry, something went wrong on our end.".to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let short = self.status.canonical_reason().unwrap_or("Error");
        let body = ErrorBody {
            error_code: self.status.as_u16(),
            error_message_short: short,
            error_message_long: &self.message,
        };
        let page = ErrorPage {
            code: self.status.as_u16(),
            short: short.to_string(),
            long: self.message.clone(),
        };
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(page);
        if let Some(source) = self.source {
            response.extensions_mut().insert(ReportedError(source));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn internal_errors_hide_cause_but_keep_it_for_reporting() {
        let response = ApiError::internal(anyhow!("db locked")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let reported = response
            .extensions()
            .get::<ReportedError>()
            .expect("reported");
        assert_eq!(reported.0.to_string(), "db locked");
        let page = response.extensions().get::<ErrorPage>().expect("page");
        assert!(!page.long.contains("db locked"));
    }

    #[test]
    fn client_errors_are_not_reported() {
        let response = ApiError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.extensions().get::<ReportedError>().is_none());
        assert_eq!(
            response.extensions().get::<ErrorPage>().expect("page").long,
            "nope"
        );
    }
}
