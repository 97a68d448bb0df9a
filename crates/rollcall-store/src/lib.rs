//! rollcall-store — Persistence of the enrolled gallery and attendance sessions.
//!
//! [`JsonStore`] keeps both as versioned JSON documents in one data
//! directory and writes them atomically. Files in the older flat formats are
//! migrated to the current schema the first time they are loaded.

mod json;
mod legacy;

pub use json::{JsonStore, MigrationPolicy, GALLERY_FILE, REFERENCES_DIR, SESSIONS_FILE};

use rollcall_core::{AttendanceSession, Identity};
use std::path::PathBuf;
use thiserror::Error;

/// Schema version written into every document.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported schema version {found} in {path} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}

/// Durable home of the enrolled identities.
pub trait GalleryStorage: Send + Sync {
    fn load_gallery(&self) -> Result<Vec<Identity>, StoreError>;
    fn save_gallery(&self, identities: &[Identity]) -> Result<(), StoreError>;
}

/// Durable home of the attendance sessions.
pub trait SessionStorage: Send + Sync {
    fn load_sessions(&self) -> Result<Vec<AttendanceSession>, StoreError>;
    fn save_sessions(&self, sessions: &[AttendanceSession]) -> Result<(), StoreError>;
}
