use std::fs::read_to_string;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::LocalFile;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("error reading contents: `{0}`")]
    Read(#[from] io::Error),
    #[error("file not found: `{0}`")]
    FileNotFound(String),
}

pub trait FileReader {
    fn read(&self, path: &Path) -> Result<String, ReadError>;
}

impl FileReader for LocalFile {
    fn read(&self, path: &Path) -> Result<String, ReadError> {
        if !path.is_file() {
            return Err(ReadError::FileNotFound(path.display().to_string()));
        }
        Ok(read_to_string(path)?)
    }
}
