//! rollcalld — the attendance daemon's building blocks.
//!
//! [`AttendanceService`] ties the inference engine, the gallery and the
//! attendance sessions together; the binary adds the spool watcher and the
//! presence sweeper around it. The `rollcall` CLI reuses the same service.

pub mod attendance;
pub mod config;
pub mod engine;
pub mod error;
pub mod gallery;
pub mod service;
pub mod spool;
pub mod sweeper;

#[cfg(test)]
mod testing;

pub use attendance::{SessionBook, SessionManager, SessionPolicy, SessionUpdate};
pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use error::ServiceError;
pub use service::{AttendanceService, Recognition, ReencodeReport, ServiceOptions};
