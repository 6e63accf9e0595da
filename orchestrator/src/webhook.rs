//! HMAC-authenticated registry webhooks that redeploy running services.

pub mod redeploy;
pub mod signature;

use thiserror::Error;

use crate::catalog::CatalogError;

pub use redeploy::{WebhookOutcome, WebhookRedeployer};

#[derive(Error, Debug)]
pub enum WebhookError {
    /// No user owns the path token.
    #[error("unknown webhook token")]
    UnknownToken,

    /// Missing or mismatched signature, or no secret configured.
    #[error("webhook rejected: {0}")]
    Unauthorized(String),

    #[error("malformed webhook payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
