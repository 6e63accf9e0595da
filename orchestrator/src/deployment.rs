//! Materializes catalog services as running containers on nodes.

pub mod engine;
pub mod links;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::runner::RunnerError;

pub use engine::{DeployOutcome, DeploymentEngine};

#[derive(Error, Debug)]
pub enum EngineError {
    /// Covers both absent rows and ownership mismatches; the two are
    /// indistinguishable on purpose.
    #[error("service, node or deployment not found")]
    NotFound,

    #[error("placements on the local node require root")]
    LocalNodeForbidden,

    #[error("port {0} is outside the valid range")]
    InvalidPort(u16),

    #[error("port {port} is already in use on node {node}")]
    PortConflict { port: u16, node: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}
