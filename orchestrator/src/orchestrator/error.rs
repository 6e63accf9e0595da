use thiserror::Error;

use crate::catalog::CatalogError;
use crate::cipher::CipherError;

use super::config::ConfigError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("could not open catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("could not install signal handler: {0}")]
    Signal(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}
