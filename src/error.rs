//! Error model.
//! `IdentityError` is what the core returns; `AppError` is the flattened code/message
//! shape handed to protocol frontends (HTTP today).
//!
//! An invalid or expired session is not an error: see `SessionValidation`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    /// Caller-supplied value failed shape checks. Raised before any collaborator is touched.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("invalid phone format: '{0}'")]
    InvalidPhoneFormat(String),

    #[error("malformed claims: {0}")]
    MalformedClaims(String),

    /// The caller is not allowed to proceed.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Session was invalid, or valid but its backing user is gone.
    #[error("unresolvable identity: {reason}")]
    UnresolvableIdentity { reason: String },

    #[error("user already exists in tenant '{tenant}' ({key})")]
    DuplicateUser { tenant: String, key: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user '{user}' not found in tenant '{tenant}'")]
    UserNotFound { tenant: String, user: String },

    #[error("{operation} is not supported in {mode} mode")]
    UnsupportedInMode { operation: &'static str, mode: &'static str },

    /// Storage or identity provider failure. Never retried here.
    #[error("collaborator failure: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

impl IdentityError {
    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        IdentityError::InvalidInput { field, reason: reason.into() }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        IdentityError::Unauthorized { reason: reason.into() }
    }

    pub fn unresolvable(reason: impl Into<String>) -> Self {
        IdentityError::UnresolvableIdentity { reason: reason.into() }
    }

    pub fn duplicate(tenant: impl Display, key: impl Into<String>) -> Self {
        IdentityError::DuplicateUser { tenant: tenant.to_string(), key: key.into() }
    }

    pub fn user_not_found(tenant: impl Display, user: impl Display) -> Self {
        IdentityError::UserNotFound { tenant: tenant.to_string(), user: user.to_string() }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::InvalidInput { .. } => "invalid_input",
            IdentityError::InvalidPhoneFormat(_) => "invalid_phone_format",
            IdentityError::MalformedClaims(_) => "malformed_claims",
            IdentityError::Unauthorized { .. } => "unauthorized",
            IdentityError::UnresolvableIdentity { .. } => "unresolvable_identity",
            IdentityError::DuplicateUser { .. } => "duplicate_user",
            IdentityError::InvalidCredentials => "invalid_credentials",
            IdentityError::UserNotFound { .. } => "user_not_found",
            IdentityError::UnsupportedInMode { .. } => "unsupported_in_mode",
            IdentityError::Backend(_) => "backend_unavailable",
        }
    }
}

/// Coarse failure class a frontend turns into a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    Unsupported,
    Unavailable,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unsupported => 422,
            ErrorKind::Unavailable => 503,
        }
    }
}

/// Flattened error for protocol frontends. Built only from `IdentityError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind { self.kind }

    pub fn code_str(&self) -> &str { self.code }

    pub fn message(&self) -> &str { &self.message }

    pub fn http_status(&self) -> u16 { self.kind.http_status() }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        let kind = match &err {
            IdentityError::InvalidInput { .. }
            | IdentityError::InvalidPhoneFormat(_)
            | IdentityError::MalformedClaims(_) => ErrorKind::BadRequest,
            IdentityError::Unauthorized { .. } | IdentityError::InvalidCredentials => ErrorKind::Unauthorized,
            IdentityError::UnresolvableIdentity { .. } | IdentityError::UserNotFound { .. } => ErrorKind::NotFound,
            IdentityError::DuplicateUser { .. } => ErrorKind::Conflict,
            IdentityError::UnsupportedInMode { .. } => ErrorKind::Unsupported,
            IdentityError::Backend(_) => ErrorKind::Unavailable,
        };
        // Collaborator detail stays in the logs.
        let message = match &err {
            IdentityError::Backend(_) => "identity backend unavailable".to_string(),
            other => other.to_string(),
        };
        AppError { kind, code: err.code(), message }
    }
}
