use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use todo_pipeline::CommandError;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("bind http :{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("http server: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// An error rendered as `{"error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), detail: None }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn with_detail(mut self, debug: bool, detail: impl FnOnce() -> String) -> Self {
        if debug {
            self.detail = Some(detail());
        }
        self
    }

    pub fn from_command(e: CommandError, debug: bool) -> Self {
        let status = match &e {
            CommandError::Validation(_) => StatusCode::BAD_REQUEST,
            CommandError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommandError::Publish(p) if p.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            CommandError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Broker internals stay out of the public message.
        let message = match &e {
            CommandError::Validation(v) => v.to_string(),
            CommandError::Encode(_) => "could not encode command".to_string(),
            CommandError::Publish(_) => "could not publish command".to_string(),
        };
        Self::new(status, message).with_detail(debug, || format!("{e:?}"))
    }

    pub fn from_rejection(e: JsonRejection, debug: bool) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text()).with_detail(debug, || format!("{e:?}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.message, detail: self.detail };
        (self.status, Json(body)).into_response()
    }
}
