//! Error taxonomy → status code mapping.
//!
//! Ownership failures masquerade as 404; internal details are logged and
//! replaced with an opaque message.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::catalog::CatalogError;
use crate::cloud::CloudError;
use crate::deployment::EngineError;
use crate::migration::MigrationError;
use crate::resources::ResourceError;
use crate::runner::RunnerError;
use crate::webhook::WebhookError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    /// Cloud API or node transport failure surfaced to the caller.
    #[error("{0}")]
    Upstream(String),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Logs the detail and returns the opaque variant.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "internal error");
        ApiError::Internal
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::DuplicateServiceName => ApiError::Conflict(err.to_string()),
            CatalogError::MigrationInProgress => ApiError::Conflict(err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound => ApiError::NotFound,
            EngineError::LocalNodeForbidden => ApiError::Forbidden(err.to_string()),
            EngineError::InvalidPort(_) => ApiError::Validation(err.to_string()),
            EngineError::PortConflict { .. } => ApiError::Conflict(err.to_string()),
            EngineError::Catalog(inner) => inner.into(),
            EngineError::Runner(inner) => inner.into(),
        }
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound => ApiError::NotFound,
            ResourceError::InvalidName => ApiError::Validation(err.to_string()),
            ResourceError::LocalNodeForbidden => ApiError::Forbidden(err.to_string()),
            ResourceError::InvalidPort(_) => ApiError::Validation(err.to_string()),
            ResourceError::PortConflict { .. } => ApiError::Conflict(err.to_string()),
            ResourceError::Catalog(inner) => inner.into(),
            ResourceError::Runner(inner) => inner.into(),
        }
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::NotFound => ApiError::NotFound,
            MigrationError::NodeNotProvisioned => ApiError::Validation(err.to_string()),
            MigrationError::InvalidState(_) => ApiError::Conflict(err.to_string()),
            MigrationError::NoDevicePath => ApiError::Upstream(err.to_string()),
            MigrationError::Interrupted => ApiError::internal(err),
            MigrationError::Catalog(inner) => inner.into(),
            MigrationError::Cloud(inner) => inner.into(),
            MigrationError::Runner(inner) => inner.into(),
        }
    }
}

impl From<CloudError> for ApiError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::UnknownProvider(_) | CloudError::MissingCredentials(_) => {
                ApiError::Validation(err.to_string())
            }
            CloudError::Provider(_) | CloudError::Deadline => ApiError::Upstream(err.to_string()),
            CloudError::Catalog(inner) => inner.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::UnknownToken => ApiError::NotFound,
            WebhookError::Unauthorized(_) => ApiError::Unauthorized(err.to_string()),
            WebhookError::Payload(_) => ApiError::Validation(err.to_string()),
            WebhookError::Catalog(inner) => inner.into(),
        }
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_the_taxonomy() {
        assert_eq!(400, ApiError::Validation("x".into()).status_code().as_u16());
        assert_eq!(401, ApiError::Unauthorized("x".into()).status_code().as_u16());
        assert_eq!(403, ApiError::Forbidden("x".into()).status_code().as_u16());
        assert_eq!(404, ApiError::NotFound.status_code().as_u16());
        assert_eq!(409, ApiError::Conflict("x".into()).status_code().as_u16());
        assert_eq!(502, ApiError::Upstream("x".into()).status_code().as_u16());
        assert_eq!(500, ApiError::Internal.status_code().as_u16());
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = ApiError::internal("connection string leaked secrets");
        assert_eq!("internal error", err.to_string());
    }

    #[test]
    fn test_engine_errors_map_onto_the_taxonomy() {
        assert_eq!(404, ApiError::from(EngineError::NotFound).status_code().as_u16());
        assert_eq!(
            409,
            ApiError::from(EngineError::PortConflict { port: 80, node: "n".into() })
                .status_code()
                .as_u16()
        );
        assert_eq!(
            409,
            ApiError::from(MigrationError::Catalog(CatalogError::MigrationInProgress))
                .status_code()
                .as_u16()
        );
    }
}
