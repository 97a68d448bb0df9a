//! JSON-file storage backend.

use crate::legacy::{self, Loaded};
use crate::{GalleryStorage, SessionStorage, StoreError, SCHEMA_VERSION};
use chrono::{DateTime, Duration, Local};
use rollcall_core::{AttendanceSession, Identity};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const GALLERY_FILE: &str = "gallery.json";
pub const SESSIONS_FILE: &str = "attendance.json";
pub const REFERENCES_DIR: &str = "references";

/// How open sessions from the login/logout format are closed on migration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationPolicy {
    /// A session never spans more than this from its first appearance.
    pub auto_close_after: Duration,
    /// Open sessions younger than this are carried over still open.
    pub reopen_window: Duration,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            auto_close_after: Duration::hours(8),
            reopen_window: Duration::days(2),
        }
    }
}

#[derive(Serialize)]
struct GalleryDocument<'a> {
    version: u32,
    identities: &'a [Identity],
}

#[derive(Serialize)]
struct SessionDocument<'a> {
    version: u32,
    sessions: &'a [AttendanceSession],
}

/// Gallery and sessions as JSON documents under one data directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
    migration: MigrationPolicy,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            migration: MigrationPolicy::default(),
        }
    }

    pub fn with_migration(mut self, migration: MigrationPolicy) -> Self {
        self.migration = migration;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.dir.join(GALLERY_FILE)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.dir.join(SESSIONS_FILE)
    }

    /// Load sessions, closing stale open legacy records relative to `now`.
    pub fn load_sessions_at(&self, now: DateTime<Local>) -> Result<Vec<AttendanceSession>, StoreError> {
        let path = self.sessions_path();
        let Some(value) = read_document(&path)? else {
            return Ok(Vec::new());
        };

        let names = self.display_names();
        let loaded = legacy::sessions_from_value(value, &path, now, &self.migration, &names)?;
        self.finish_load(loaded, &path, |sessions| self.save_sessions(sessions))
    }

    /// Display names from the gallery, for legacy records that lack one.
    fn display_names(&self) -> HashMap<String, String> {
        match self.load_gallery() {
            Ok(identities) => identities.into_iter().map(|i| (i.id, i.display_name)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "gallery unreadable; migrated sessions fall back to ids as names");
                HashMap::new()
            }
        }
    }

    fn finish_load<T>(
        &self,
        loaded: Loaded<T>,
        path: &Path,
        write_back: impl FnOnce(&[T]) -> Result<(), StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        if loaded.migrated {
            write_back(&loaded.items)?;
            tracing::info!(path = %path.display(), records = loaded.items.len(), "migrated legacy document");
        }
        Ok(loaded.items)
    }
}

impl GalleryStorage for JsonStore {
    fn load_gallery(&self) -> Result<Vec<Identity>, StoreError> {
        let path = self.gallery_path();
        let Some(value) = read_document(&path)? else {
            return Ok(Vec::new());
        };

        let loaded = legacy::gallery_from_value(value, &path)?;
        self.finish_load(loaded, &path, |identities| self.save_gallery(identities))
    }

    fn save_gallery(&self, identities: &[Identity]) -> Result<(), StoreError> {
        let doc = GalleryDocument {
            version: SCHEMA_VERSION,
            identities,
        };
        write_atomic(&self.gallery_path(), &doc)
    }
}

impl SessionStorage for JsonStore {
    fn load_sessions(&self) -> Result<Vec<AttendanceSession>, StoreError> {
        self.load_sessions_at(Local::now())
    }

    fn save_sessions(&self, sessions: &[AttendanceSession]) -> Result<(), StoreError> {
        let doc = SessionDocument {
            version: SCHEMA_VERSION,
            sessions,
        };
        write_atomic(&self.sessions_path(), &doc)
    }
}

/// Read a JSON file; `None` when it does not exist or is empty.
fn read_document(path: &Path) -> Result<Option<serde_json::Value>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Json { path: path.to_path_buf(), source })
}

/// Serialize to a temp file beside `path`, fsync, then rename over it.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|source| StoreError::Json { path: path.to_path_buf(), source })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "document written");
    Ok(())
}
