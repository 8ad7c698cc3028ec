use serde::Serialize;
use thiserror::Error;

use crate::classifier::ClassifyError;

/// Every failure the gateway can report, grouped by what the caller can do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    ProhibitedOperation,
    NotSelect,
    Timeout,
    BackendError,
    InternalError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::ProhibitedOperation => "PROHIBITED_OPERATION",
            ErrorKind::NotSelect => "NOT_SELECT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::BackendError => "BACKEND_ERROR",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error("Invalid request")]
    Validation(Vec<FieldError>),

    #[error("Invalid request body: {0}")]
    MalformedBody(String),

    #[error("Query timeout")]
    Timeout,

    /// Backend message for the caller's own statement, shown as-is.
    #[error("{0}")]
    Backend(String),

    /// The detail is for server logs only and never rendered.
    #[error("Failed to execute query")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Classify(ClassifyError::InvalidInput)
            | GatewayError::Validation(_)
            | GatewayError::MalformedBody(_) => ErrorKind::InvalidInput,
            GatewayError::Classify(ClassifyError::ProhibitedOperation { .. }) => {
                ErrorKind::ProhibitedOperation
            }
            GatewayError::Classify(ClassifyError::NotSelect) => ErrorKind::NotSelect,
            GatewayError::Timeout => ErrorKind::Timeout,
            GatewayError::Backend(_) => ErrorKind::BackendError,
            GatewayError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

#[cfg(feature = "server")]
mod response {
    use actix_web::http::StatusCode;
    use actix_web::{HttpResponse, ResponseError};
    use serde::Serialize;

    use super::{ErrorKind, FieldError, GatewayError};

    #[derive(Serialize)]
    struct ErrorResponse<'a> {
        success: bool,
        error: String,
        code: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        errors: Option<&'a [FieldError]>,
    }

    impl ResponseError for GatewayError {
        fn status_code(&self) -> StatusCode {
            match self.kind() {
                ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            }
        }

        fn error_response(&self) -> HttpResponse {
            let errors = match self {
                GatewayError::Validation(errors) => Some(errors.as_slice()),
                _ => None,
            };

            HttpResponse::build(self.status_code()).json(ErrorResponse {
                success: false,
                error: self.to_string(),
                code: self.kind().code(),
                errors,
            })
        }
    }
}
