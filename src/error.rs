//! Error types for the account service.
//!
//! Every failure the service can report is a variant of [`Error`]. Each variant
//! maps to exactly one stable [`ErrorCode`], and each code belongs to one
//! [`ErrorKind`] which decides the HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::store::StoreError;
use crate::token::TokenError;

/// Coarse failure class, one per HTTP status the service emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Always fixable by the client.
    Validation,
    /// Uniqueness violation.
    Conflict,
    /// Missing, malformed, invalid or expired credentials.
    Authentication,
    /// Valid identity that may not perform the request.
    Authorization,
    /// Referenced entity is absent.
    NotFound,
    /// Client exceeded its request budget.
    RateLimit,
    /// Storage, allocation or configuration failure.
    Internal,
}

impl ErrorKind {
    /// HTTP status rendered for this kind.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Stable machine-readable error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingFields,
    InvalidUsername,
    InvalidPassword,
    ValidationError,
    UsernameExists,
    UserNotAuthenticated,
    InvalidAuthHeader,
    InvalidToken,
    TokenExpired,
    InvalidCredentials,
    UserBanned,
    AccountDisabled,
    NoPermission,
    UserNotFound,
    BanNotFound,
    TooManyRequests,
    AllocationFailed,
    InternalError,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingFields => "MISSING_FIELDS",
            ErrorCode::InvalidUsername => "INVALID_USERNAME",
            ErrorCode::InvalidPassword => "INVALID_PASSWORD",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::UsernameExists => "USERNAME_EXISTS",
            ErrorCode::UserNotAuthenticated => "USER_NOT_AUTHENTICATED",
            ErrorCode::InvalidAuthHeader => "INVALID_AUTH_HEADER",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::UserBanned => "USER_BANNED",
            ErrorCode::AccountDisabled => "ACCOUNT_DISABLED",
            ErrorCode::NoPermission => "NO_PERMISSION",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::BanNotFound => "BAN_NOT_FOUND",
            ErrorCode::TooManyRequests => "TOO_MANY_REQUESTS",
            ErrorCode::AllocationFailed => "ALLOCATION_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Failure class this code belongs to.
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::MissingFields
            | ErrorCode::InvalidUsername
            | ErrorCode::InvalidPassword
            | ErrorCode::ValidationError => ErrorKind::Validation,
            ErrorCode::UsernameExists => ErrorKind::Conflict,
            ErrorCode::UserNotAuthenticated
            | ErrorCode::InvalidAuthHeader
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::InvalidCredentials => ErrorKind::Authentication,
            ErrorCode::UserBanned | ErrorCode::AccountDisabled | ErrorCode::NoPermission => {
                ErrorKind::Authorization
            }
            ErrorCode::UserNotFound | ErrorCode::BanNotFound => ErrorKind::NotFound,
            ErrorCode::TooManyRequests => ErrorKind::RateLimit,
            ErrorCode::AllocationFailed | ErrorCode::InternalError => ErrorKind::Internal,
        }
    }
}

/// Main error type of the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required request field was absent or empty.
    #[error("Missing required fields")]
    MissingFields,

    /// The user name does not satisfy the format rules.
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// The password does not satisfy the format rules.
    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    /// The request body could not be parsed or a record failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The user name is already registered.
    #[error("Username '{0}' already exists")]
    UsernameTaken(String),

    /// No `Authorization` header was supplied.
    #[error("No authentication token provided")]
    NotAuthenticated,

    /// The `Authorization` header is not exactly `Bearer <token>`.
    #[error("Authorization header must be 'Bearer <token>'")]
    InvalidAuthHeader,

    /// The bearer token was rejected by the token service.
    #[error("Token rejected: {0}")]
    Token(#[from] TokenError),

    /// The password does not match the stored hash.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The user has at least one ban record.
    #[error("User {0} is banned")]
    Banned(u64),

    /// The user account has been disabled.
    #[error("User {0} is disabled: {1}")]
    Disabled(u64, String),

    /// The caller is not on the admin allow-list.
    #[error("User {0} has no permission for this operation")]
    NoPermission(u64),

    /// The referenced user does not exist.
    #[error("User not found")]
    UserNotFound,

    /// Unban was requested for a user without ban records.
    #[error("No ban record found for user {0}")]
    BanNotFound(u64),

    /// The client exceeded its rate-limit window.
    #[error("Too many requests, please retry later")]
    TooManyRequests,

    /// The counter store could not apply the increment.
    #[error("User id allocation failed: {0}")]
    AllocationFailed(String),

    /// Invalid or missing process configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The password hasher failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl Error {
    /// Stable code reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::MissingFields => ErrorCode::MissingFields,
            Error::InvalidUsername(_) => ErrorCode::InvalidUsername,
            Error::InvalidPassword(_) => ErrorCode::InvalidPassword,
            Error::Validation(_) => ErrorCode::ValidationError,
            Error::UsernameTaken(_) => ErrorCode::UsernameExists,
            Error::NotAuthenticated => ErrorCode::UserNotAuthenticated,
            Error::InvalidAuthHeader => ErrorCode::InvalidAuthHeader,
            Error::Token(TokenError::Expired) => ErrorCode::TokenExpired,
            Error::Token(TokenError::Malformed | TokenError::InvalidSignature) => {
                ErrorCode::InvalidToken
            }
            Error::InvalidCredentials => ErrorCode::InvalidCredentials,
            Error::Banned(_) => ErrorCode::UserBanned,
            Error::Disabled(..) => ErrorCode::AccountDisabled,
            Error::NoPermission(_) => ErrorCode::NoPermission,
            Error::UserNotFound => ErrorCode::UserNotFound,
            Error::BanNotFound(_) => ErrorCode::BanNotFound,
            Error::TooManyRequests => ErrorCode::TooManyRequests,
            Error::AllocationFailed(_) => ErrorCode::AllocationFailed,
            Error::Config(_) | Error::Storage(_) | Error::PasswordHash(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// Body sent to the client. Internal failures never expose their detail.
    pub fn body(&self) -> ErrorBody {
        match self.kind() {
            ErrorKind::Internal => ErrorBody {
                error: ErrorCode::InternalError,
                message: "Internal server error, please retry later".to_string(),
            },
            _ => ErrorBody {
                error: self.code(),
                message: self.to_string(),
            },
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { field: "user_name", value } => Error::UsernameTaken(value),
            StoreError::Duplicate { field, value } => {
                Error::Storage(format!("duplicate {field} '{value}'"))
            }
            StoreError::Invalid(reason) => Error::Validation(reason),
            StoreError::Unavailable(reason) => Error::Storage(reason),
        }
    }
}

/// JSON error payload: `{"error": CODE, "message": "..."}`.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.kind().status();
        if status.is_server_error() {
            tracing::error!(code = self.code().as_str(), "request failed: {self}");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
