//! Cutoff timestamp persistence for incremental runs.
//!
//! The date file holds a single integer, seconds since the epoch. Elements
//! strictly newer than it count as modified; after a successful run the
//! file is rewritten with the newest timestamp observed in the input.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

/// Errors raised while reading or writing the date file.
#[derive(Debug, Error)]
pub enum DateFileError {
    /// The file exists but could not be read.
    #[error("failed to read date file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file does not contain a timestamp.
    #[error("date file {path:?} does not contain a timestamp")]
    Parse { path: PathBuf },
    /// Rewriting the file failed.
    #[error("failed to write date file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read the cutoff in milliseconds; `None` when the file does not exist
/// yet, in which case every tile is written.
pub fn read_cutoff(path: &Path) -> Result<Option<i64>, DateFileError> {
    if !path.exists() {
        info!("date file {path:?} does not exist, writing all tiles");
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| DateFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let seconds: i64 = text.trim().parse().map_err(|_| DateFileError::Parse {
        path: path.to_path_buf(),
    })?;
    Ok(Some(seconds * 1000))
}

/// Record the newest observed timestamp for the next incremental run.
pub fn write_latest(path: &Path, latest_ms: i64) -> Result<(), DateFileError> {
    fs::write(path, format!("{}\n", latest_ms / 1000)).map_err(|source| DateFileError::Write {
        path: path.to_path_buf(),
        source,
    })
}
