//! Local filesystem access with explicit permissions.
//!
//! The orchestrator writes secret-bearing files (container env files, node
//! key material) and reads its own configuration through this crate, so
//! every write takes an explicit mode and paths are validated before use.

pub mod reader;
pub mod writer;

use std::path::Path;
use thiserror::Error;

/// Stateless handle performing the actual filesystem calls.
///
/// Kept as a value (rather than free functions) so callers can hold it
/// behind the [`reader::FileReader`] / [`writer::FileWriter`] traits and
/// tests can substitute mocks.
#[derive(Debug, Default, Clone)]
pub struct LocalFile;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("dots disallowed in path `{0}`")]
    DotsInPath(String),
}

/// Rejects paths containing `..` components. All paths handled by this
/// crate are built from configuration or derived names; none of them has a
/// legitimate reason to traverse upwards.
pub(crate) fn validate_path(path: &Path) -> Result<(), PathError> {
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(PathError::DotsInPath(path.display().to_string()));
    }
    Ok(())
}
