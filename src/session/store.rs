//! Durable storage for the three session fields.
//!
//! The file is a flat JSON object of strings keyed by `threadId`, `runId`
//! and `runStatus`. Every `set` rewrites it through a temp file and an
//! atomic rename, so a value is durable as soon as `set` returns. Keys the
//! client does not know are kept on rewrite.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::session::model::{RunStatus, SessionField, SessionFields};

/// Write-through key-value store for the persisted session fields.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl SessionStore {
    /// Open the store at `path`. A missing or empty file reads as all-empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = load(&path)?;
        tracing::debug!(path = %path.display(), "Opened session store");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value, empty if never set.
    pub fn get(&self, field: SessionField) -> String {
        self.values.get(field.key()).cloned().unwrap_or_default()
    }

    /// Set a value and persist immediately. Values are not validated.
    pub fn set(&mut self, field: SessionField, value: &str) -> Result<(), StoreError> {
        if self.values.get(field.key()).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.values.insert(field.key().to_string(), value.to_string());
        self.save()
    }

    /// All three fields as a typed value.
    pub fn fields(&self) -> SessionFields {
        SessionFields {
            thread_id: self.get(SessionField::ThreadId),
            run_id: self.get(SessionField::RunId),
            run_status: RunStatus::parse(&self.get(SessionField::RunStatus)),
        }
    }

    /// Persist every field of `fields` in one write.
    pub fn set_all(&mut self, fields: &SessionFields) -> Result<(), StoreError> {
        for field in SessionField::ALL {
            self.values.insert(field.key().to_string(), fields.get(field));
        }
        self.save()
    }

    /// Reset all three fields to empty.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.set_all(&SessionFields::default())
    }

    fn save(&self) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.values).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = File::create(&tmp_path).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.sync_all().map_err(io_err)?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
