// 📁 Document Storage - archival uploads for manifests
//
// The production drive lives behind `DocumentStorage`. `LocalDriveStorage`
// keeps one directory per folder id under a root directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{IntakeError, Result, Service};

pub trait DocumentStorage {
    /// Store `bytes` as `file_name` inside `folder_id`; returns an opaque file id
    fn upload(&self, bytes: &[u8], file_name: &str, folder_id: &str) -> Result<String>;
}

fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(IntakeError::invalid("File, folder ID, and file name are required"));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(IntakeError::invalid(format!("Invalid {}: {}", kind, value)));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalDriveStorage {
    root: PathBuf,
}

impl LocalDriveStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDriveStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str, folder_id: &str) -> PathBuf {
        self.root.join(folder_id).join(file_name)
    }
}

impl DocumentStorage for LocalDriveStorage {
    fn upload(&self, bytes: &[u8], file_name: &str, folder_id: &str) -> Result<String> {
        validate_name("file name", file_name)?;
        validate_name("folder ID", folder_id)?;

        let folder = self.root.join(folder_id);
        fs::create_dir_all(&folder).map_err(|e| IntakeError::upstream(Service::DocumentStorage, e))?;

        let path = folder.join(file_name);
        // Archived manifests are never overwritten
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                IntakeError::upstream(Service::DocumentStorage, format!("{}: {}", path.display(), e))
            })?;

        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| IntakeError::upstream(Service::DocumentStorage, e))?;

        let file_id = uuid::Uuid::new_v4().to_string();
        info!(file = %path.display(), file_id = %file_id, bytes = bytes.len(), "document uploaded");

        Ok(file_id)
    }
}
