use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Failures of the persistence layer, shared by every backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{0}")]
    ConstraintViolation(String),

    #[error("database error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str) -> Self {
        StoreError::NotFound { entity }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        StoreError::ConstraintViolation(msg.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    Authentication,

    #[error("Missing bearer token")]
    MissingToken,

    /// The signature checked out but the token is past its expiry; the
    /// client should log in again.
    #[error("Token expired")]
    TokenExpired,

    /// Bad signature, wrong algorithm, malformed claims or a user that no
    /// longer exists. Not recoverable by retrying.
    #[error("Token invalid")]
    TokenInvalid,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("auth configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every violated field of a request, not just the first one.
#[derive(Debug, Clone, Default, Error, PartialEq, Eq)]
#[error("Validation failed")]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.push(field, message);
        err
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Transport-level error. This is the only place error kinds are turned
/// into HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a [FieldError]>,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_failed",
            ApiError::Auth(AuthError::Authentication) => "authentication_failed",
            ApiError::Auth(AuthError::MissingToken) => "missing_token",
            ApiError::Auth(AuthError::TokenExpired) => "token_expired",
            ApiError::Auth(AuthError::TokenInvalid) => "token_invalid",
            ApiError::Auth(AuthError::Store(e)) | ApiError::Store(e) => store_code(e),
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Auth(_) | ApiError::InternalError(_) => "internal",
        }
    }

    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

fn store_code(err: &StoreError) -> &'static str {
    match err {
        StoreError::NotFound { .. } => "not_found",
        StoreError::ConstraintViolation(_) => "conflict",
        StoreError::Backend(_) => "internal",
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::ConstraintViolation(_) => StatusCode::CONFLICT,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(AuthError::Authentication)
            | ApiError::Auth(AuthError::MissingToken)
            | ApiError::Auth(AuthError::TokenExpired)
            | ApiError::Auth(AuthError::TokenInvalid) => StatusCode::UNAUTHORIZED,
            ApiError::Auth(AuthError::Store(e)) | ApiError::Store(e) => store_status(e),
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        }

        let fields = match self {
            ApiError::Validation(v) => Some(v.fields.as_slice()),
            _ => None,
        };

        HttpResponse::build(status).json(ErrorBody {
            error: self.public_message(),
            code: self.code(),
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases: Vec<(ApiError, u16)> = vec![
            (ValidationError::single("email", "required").into(), 400),
            (AuthError::Authentication.into(), 401),
            (AuthError::TokenExpired.into(), 401),
            (AuthError::TokenInvalid.into(), 401),
            (AuthError::MissingToken.into(), 401),
            (ApiError::Forbidden("not the owner".to_string()), 403),
            (StoreError::not_found("Post").into(), 404),
            (StoreError::conflict("Username exists").into(), 409),
            (AuthError::Store(StoreError::not_found("User")).into(), 404),
            (StoreError::Backend("disk full".to_string()).into(), 500),
            (AuthError::Hashing("oom".to_string()).into(), 500),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{:?}", err);
        }
    }

    #[test]
    fn expired_and_invalid_tokens_have_distinct_codes() {
        assert_eq!(ApiError::from(AuthError::TokenExpired).code(), "token_expired");
        assert_eq!(ApiError::from(AuthError::TokenInvalid).code(), "token_invalid");
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::from(StoreError::Backend("password=hunter2".to_string()));
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn validation_error_collects_every_field() {
        let mut err = ValidationError::new();
        err.push("username", "Username is required");
        err.push("password", "Password is required");

        assert!(err.has("username"));
        assert!(err.has("password"));
        assert_eq!(err.clone().into_result(), Err(err));
        assert_eq!(ValidationError::new().into_result(), Ok(()));
    }
}
