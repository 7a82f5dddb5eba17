use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::rate_limit::RateLimitDecision;
use crate::structs::response::ErrorResponse;

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    RateLimited(RateLimitDecision),
    QueueFull(String),
    TransientDependency(String),
    PermanentDependency(String),
    DbError(sea_orm::error::DbErr),
    Internal(anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code, independent of the message wording.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            AppError::QueueFull(_) => "QUEUE_FULL",
            AppError::TransientDependency(_) => "DEPENDENCY_UNAVAILABLE",
            AppError::PermanentDependency(_) => "DEPENDENCY_REJECTED",
            AppError::DbError(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TransientDependency(_) => StatusCode::BAD_GATEWAY,
            AppError::PermanentDependency(_) => StatusCode::BAD_GATEWAY,
            AppError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::QueueFull(msg) => msg.clone(),
            AppError::RateLimited(decision) => decision.message.clone(),
            AppError::TransientDependency(_) => "A dependency is temporarily unavailable".to_string(),
            AppError::PermanentDependency(msg) => msg.clone(),
            AppError::DbError(_) => "Database error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.public_message())
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<sea_orm::error::DbErr> for AppError {
    fn from(error: sea_orm::error::DbErr) -> Self {
        AppError::DbError(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        match error.status() {
            Some(status) if status.is_client_error() => {
                AppError::PermanentDependency(error.to_string())
            }
            _ => AppError::TransientDependency(error.to_string()),
        }
    }
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse::new(self.public_message(), self.code()));

        match &self {
            AppError::Internal(e) => tracing::error!("Internal error: {:?}", e),
            AppError::DbError(e) => tracing::error!("Database error: {:?}", e),
            AppError::Unauthorized(msg) | AppError::Forbidden(msg) => {
                tracing::warn!(security_event = true, "Auth failure: {}", msg);
            }
            _ => tracing::warn!("Request error: {}", self),
        }

        if let AppError::RateLimited(decision) = &self {
            let mut response = (status, body).into_response();
            response
                .headers_mut()
                .extend(crate::rate_limit::headers::rate_limit_headers(decision));
            return response;
        }

        (status, body).into_response()
    }
}
