//! Record persistence for the command-line host.
//!
//! Unique responsibility: load and store one resource record as a JSON file.
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write never leaves a truncated record behind.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::hostman_error::{ReconcileError, Result};

/// JSON file holding one resource record.
#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    /// Create a record file handle.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path to the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record; a missing file is an empty object.
    ///
    /// # Errors
    ///
    /// Returns `Io` on read failures and `Decode` if the file is not JSON.
    pub fn load(&self) -> Result<Value> {
        if !self.path.exists() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        let bytes = fs::read(&self.path).map_err(|e| self.io(e))?;
        serde_json::from_slice(&bytes).map_err(|source| ReconcileError::Decode {
            context: format!("record file {}", self.path.display()),
            source,
        })
    }

    /// Store the record with an atomic replace.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failures and `Encode` if serialization fails.
    pub fn save(&self, record: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }

        let mut tmp = self.path.clone();
        let tmp_name = format!(
            ".{}.tmp",
            self.path
                .file_name()
                .and_then(std::ffi::OsStr::to_str)
                .unwrap_or("record")
        );
        tmp.set_file_name(tmp_name);

        let json = serde_json::to_vec_pretty(record).map_err(ReconcileError::Encode)?;
        {
            let mut f = fs::File::create(&tmp).map_err(|e| self.io(e))?;
            f.write_all(&json).map_err(|e| self.io(e))?;
            f.sync_all().map_err(|e| self.io(e))?;
        }

        if self.path.exists() {
            // Windows refuses to rename over an existing file.
            let _ = fs::remove_file(&self.path);
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io(e))
    }

    fn io(&self, source: io::Error) -> ReconcileError {
        ReconcileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
