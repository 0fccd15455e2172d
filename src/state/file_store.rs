//! File-backed state store
//!
//! One YAML document per environment under a root directory. Writes go
//! to a temp file in the same directory and are renamed into place, so
//! a crash mid-save leaves either the old record or the new one, never
//! a torn file.

use super::{EnvironmentRecord, StateStore};
use crate::error::{DeployError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the platform data directory
    pub fn with_default_path() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipwright")
            .join("environments");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.yml"))
    }
}

#[async_trait::async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, name: &str) -> Result<Option<EnvironmentRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let body = std::fs::read_to_string(&path)?;
        let record: EnvironmentRecord = serde_yaml::from_str(&body).map_err(|e| {
            DeployError::StateCorrupt(format!("{}: {e}", path.display()))
        })?;
        record.validate()?;
        if record.name != name {
            return Err(DeployError::StateCorrupt(format!(
                "{}: record is for environment '{}'",
                path.display(),
                record.name
            )));
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &EnvironmentRecord) -> Result<()> {
        record.validate()?;
        std::fs::create_dir_all(&self.root)?;

        let path = self.record_path(&record.name);
        let tmp = self.root.join(format!(".{}.yml.tmp", record.name));
        let body = serde_yaml::to_string(record)?;

        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;

        debug!(environment = %record.name, path = %path.display(), "state saved");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.record_path(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some("yml")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .starts_with('.');
            if is_record {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
