//! Stateful resources: provisioning databases, caches, brokers, monitoring
//! stacks and object storages as containers on a node.

pub mod blueprint;
pub mod provisioner;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::runner::RunnerError;

pub use provisioner::{CreateResourceOutcome, CreateResourceRequest, ResourceProvisioner};

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("resource or node not found")]
    NotFound,

    #[error("invalid resource name")]
    InvalidName,

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
