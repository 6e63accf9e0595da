//! Node volume migration: moving a node's container-runtime volume
//! directory onto an attached cloud block volume, with rollback.

pub mod commands;
pub mod migrator;

use thiserror::Error;

use crate::catalog::entity::MigrationStatus;
use crate::catalog::CatalogError;
use crate::cloud::CloudError;
use crate::runner::RunnerError;

pub use migrator::VolumeMigrator;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("node or migration not found")]
    NotFound,

    #[error("node has no cloud provider or instance id")]
    NodeNotProvisioned,

    #[error("migration is in state `{}`", .0.as_str())]
    InvalidState(MigrationStatus),

    #[error("volume provided no device path")]
    NoDevicePath,

    #[error("migration interrupted by shutdown")]
    Interrupted,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}
