use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Cache error: {0}")]
    CacheError(#[from] CacheError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    /// Message rendered to HTTP clients. Infrastructure failures collapse to a
    /// fixed string so store and cache details never leave the service.
    pub fn public_message(&self) -> String {
        match self {
            AppError::AuthError(e) => e.to_string(),
            AppError::ValidationError(msg) => msg.clone(),
            AppError::DatabaseError(DatabaseError::NotFound) => "Resource not found".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => AppError::AuthError(AuthError::InvalidOrExpiredToken),
            TokenError::Signing(msg) => AppError::InternalError(msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.public_message()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::Conflict(_) => StatusCode::CONFLICT,
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
                AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
                AuthError::AccountDeactivated => StatusCode::FORBIDDEN,
                AuthError::Forbidden => StatusCode::FORBIDDEN,
                AuthError::IncorrectPassword => StatusCode::BAD_REQUEST,
                AuthError::AlreadyVerified => StatusCode::BAD_REQUEST,
                AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The closed set of outcomes callers of the authentication service can observe.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0} already exists")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Current password is incorrect")]
    IncorrectPassword,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Email is already verified")]
    AlreadyVerified,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    /// Unique constraint violation; carries the offending field.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Operation timed out")]
    Timeout,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::PoolTimedOut => DatabaseError::Timeout,
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate(duplicate_field(db_err.constraint()))
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}

/// Maps a violated unique constraint onto the user-facing field name.
fn duplicate_field(constraint: Option<&str>) -> String {
    match constraint {
        Some(c) if c.contains("email") => "email".to_string(),
        Some(c) if c.contains("username") => "username".to_string(),
        Some(c) => c.to_string(),
        None => "record".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache operation timed out")]
    Timeout,
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Any parse, signature, algorithm, audience, issuer or time-bound failure.
    #[error("Invalid token")]
    Invalid,

    #[error("Token signing failed: {0}")]
    Signing(String),
}
