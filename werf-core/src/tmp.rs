//! Per-run project scratch directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WerfError};

/// Scratch directory owned by one conveyor run. Patch and archive artifacts
/// land here; the directory is removed when the run ends.
#[derive(Debug)]
pub struct ProjectTmpDir {
    path: PathBuf,
}

impl ProjectTmpDir {
    pub fn create() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("werf-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&path).map_err(|e| WerfError::io(&path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProjectTmpDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
