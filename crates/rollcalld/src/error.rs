use crate::engine::EngineError;
use rollcall_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// The write failed; in-memory state keeps the update and the next
    /// successful persist will carry it.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
