//! Cloud provider collaborators.
//!
//! The orchestrator needs five opaque operations from a node's provider:
//! create/attach/detach/delete block volume and provision instance. The
//! SDKs themselves live behind [`provider::Provider`]; the registry
//! resolves a node's provider tag plus the owner's stored API token into a
//! ready-to-use client.

pub mod provider;
pub mod registry;

use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("no provider registered for `{0}`")]
    UnknownProvider(String),

    #[error("missing provider credentials: {0}")]
    MissingCredentials(String),

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("provider call exceeded its deadline")]
    Deadline,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
