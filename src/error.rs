use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use validator::ValidationErrors;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited")]
    RateLimited,
    #[error("validation failed")]
    Validation {
        errors: ValidationErrors,
        /// The submitted field values, echoed back so the client can
        /// re-render the form.
        form: serde_json::Value,
    },
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Internal(_) => ApiError::Internal,
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation { errors, form } => {
                HttpResponse::build(StatusCode::BAD_REQUEST).json(serde_json::json!({
                    "error": "validation failed",
                    "fields": errors,
                    "form": form,
                }))
            }
            other => {
                let status = match other {
                    ApiError::NotFound => StatusCode::NOT_FOUND,
                    ApiError::Conflict => StatusCode::CONFLICT,
                    ApiError::Forbidden => StatusCode::FORBIDDEN,
                    ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                HttpResponse::build(status).json(ApiErrorBody { error: other.to_string() })
            }
        }
    }
}
