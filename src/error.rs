use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::forms::FieldErrors;
use crate::repo::RepoError;
use crate::service::ServiceError;
use crate::storage::ImageStoreError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("validation failed")] Validation(FieldErrors),
    #[error("bad request")] BadRequest,
    #[error("forbidden")] Forbidden,
    #[error("not found")] NotFound,
    #[error("payload too large")] PayloadTooLarge,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Internal(msg) => {
                log::error!("repository error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(fields) => ApiError::Validation(fields),
            ServiceError::CommentsDisabled => ApiError::Forbidden,
            ServiceError::Repo(e) => e.into(),
            ServiceError::Storage(ImageStoreError::NotFound) => ApiError::NotFound,
            ServiceError::Storage(e) => {
                log::error!("image store error: {e}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::Validation(_) | ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let fields = match self {
            ApiError::Validation(f) => Some(f.clone()),
            _ => None,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string(), fields })
    }
}
