use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::path::Path;

#[cfg(target_family = "unix")]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;

use thiserror::Error;

use crate::{validate_path, LocalFile, PathError};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("error creating file: `{0}`")]
    Io(#[from] io::Error),
    #[error("invalid path: `{0}`")]
    InvalidPath(#[from] PathError),
}

pub trait FileWriter {
    fn write(
        &self,
        path: &Path,
        contents: String,
        permissions: Permissions,
    ) -> Result<(), WriteError>;
}

impl FileWriter for LocalFile {
    /// Creates (or truncates) `path` with the given mode. The mode is applied
    /// at open time so the file never exists with wider permissions.
    #[cfg(target_family = "unix")]
    fn write(
        &self,
        path: &Path,
        contents: String,
        permissions: Permissions,
    ) -> Result<(), WriteError> {
        validate_path(path)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(permissions.mode())
            .open(path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }
}
