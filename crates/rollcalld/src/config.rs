use rollcall_core::{BackendKind, DebouncePolicy, MatchPolicy, ModelPaths};
use rollcall_store::MigrationPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Session timing, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTiming {
    /// An identity unseen for this long leaves the live-presence set.
    pub face_timeout_secs: u64,
    /// Maximum span of one day's session from its first appearance.
    pub auto_close_after_secs: u64,
    /// Open legacy sessions younger than this are migrated still open.
    pub reopen_window_secs: u64,
    /// Period of the presence sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            face_timeout_secs: 300,
            auto_close_after_secs: 8 * 3600,
            reopen_window_secs: 2 * 86_400,
            sweep_interval_secs: 60,
        }
    }
}

/// Daemon configuration: a TOML file overlaid with `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding gallery.json, attendance.json and reference images.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Spool directory watched for incoming frames, one subdirectory per stream.
    pub spool_dir: PathBuf,
    /// How often the spool directory is polled, in milliseconds.
    pub poll_interval_ms: u64,
    pub backend: BackendKind,
    /// Faces analysed per frame, most confident first.
    pub max_faces: usize,
    pub matching: MatchPolicy,
    pub debounce: DebouncePolicy,
    pub sessions: SessionTiming,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            model_dir: data_dir.join("models"),
            spool_dir: data_dir.join("spool"),
            data_dir,
            poll_interval_ms: 500,
            backend: BackendKind::default(),
            max_faces: 4,
            matching: MatchPolicy::default(),
            debounce: DebouncePolicy::default(),
            sessions: SessionTiming::default(),
        }
    }
}

impl Config {
    /// Load the config file named by `ROLLCALL_CONFIG` (or the XDG default),
    /// then apply environment overrides. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), with an explicit file taking precedence.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path
            .or_else(|| std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        let mut config = Self::from_file(&path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Override fields from `ROLLCALL_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_SPOOL_DIR") {
            self.spool_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_BACKEND") {
            match v.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring ROLLCALL_BACKEND"),
            }
        }
        self.poll_interval_ms = env_u64("ROLLCALL_POLL_INTERVAL_MS", self.poll_interval_ms);
        self.max_faces = env_usize("ROLLCALL_MAX_FACES", self.max_faces);

        let m = &mut self.matching;
        m.distance_tolerance = env_f32("ROLLCALL_DISTANCE_TOLERANCE", m.distance_tolerance);
        m.distance_margin = env_f32("ROLLCALL_DISTANCE_MARGIN", m.distance_margin);
        m.cosine_threshold = env_f32("ROLLCALL_COSINE_THRESHOLD", m.cosine_threshold);
        m.cosine_margin = env_f32("ROLLCALL_COSINE_MARGIN", m.cosine_margin);
        m.cosine_distance_guard = env_f32("ROLLCALL_COSINE_DISTANCE_GUARD", m.cosine_distance_guard);
        m.template_threshold = env_f32("ROLLCALL_TEMPLATE_THRESHOLD", m.template_threshold);
        m.template_candidates = env_usize("ROLLCALL_TEMPLATE_CANDIDATES", m.template_candidates);

        let d = &mut self.debounce;
        d.min_consecutive_frames = env_u64("ROLLCALL_MIN_CONSECUTIVE_FRAMES", d.min_consecutive_frames as u64)
            .min(u32::MAX as u64) as u32;
        d.immediate_distance = env_opt_f32("ROLLCALL_IMMEDIATE_DISTANCE", d.immediate_distance);
        d.immediate_cosine = env_opt_f32("ROLLCALL_IMMEDIATE_COSINE", d.immediate_cosine);

        let s = &mut self.sessions;
        s.face_timeout_secs = env_u64("ROLLCALL_FACE_TIMEOUT_SECS", s.face_timeout_secs);
        s.auto_close_after_secs = env_u64("ROLLCALL_AUTO_CLOSE_AFTER_SECS", s.auto_close_after_secs);
        s.reopen_window_secs = env_u64("ROLLCALL_REOPEN_WINDOW_SECS", s.reopen_window_secs);
        s.sweep_interval_secs = env_u64("ROLLCALL_SWEEP_INTERVAL_SECS", s.sweep_interval_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.debounce.min_consecutive_frames == 0 {
            return invalid("debounce.min_consecutive_frames must be at least 1");
        }
        if self.matching.distance_margin < 0.0 || self.matching.cosine_margin < 0.0 {
            return invalid("matching margins must not be negative");
        }
        if self.max_faces == 0 {
            return invalid("max_faces must be at least 1");
        }
        if self.sessions.sweep_interval_secs == 0 || self.poll_interval_ms == 0 {
            return invalid("sweep and poll intervals must be positive");
        }
        if self.sessions.auto_close_after_secs == 0 {
            return invalid("sessions.auto_close_after_secs must be positive");
        }
        Ok(())
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.model_dir.join("det_10g.onnx"),
            recognizer: self.model_dir.join("w600k_r50.onnx"),
        }
    }

    pub fn face_timeout(&self) -> chrono::Duration {
        secs(self.sessions.face_timeout_secs)
    }

    pub fn auto_close_after(&self) -> chrono::Duration {
        secs(self.sessions.auto_close_after_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sessions.sweep_interval_secs)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn migration_policy(&self) -> MigrationPolicy {
        MigrationPolicy {
            auto_close_after: self.auto_close_after(),
            reopen_window: secs(self.sessions.reopen_window_secs),
        }
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(i64::MAX as u64) as i64)
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall").join("rollcall.toml")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`env_f32`], but `off` or an empty value disables the threshold.
fn env_opt_f32(key: &str, default: Option<f32>) -> Option<f32> {
    match std::env::var(key) {
        Ok(v) if v.is_empty() || v.eq_ignore_ascii_case("off") => None,
        Ok(v) => v.parse().ok().or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.debounce.min_consecutive_frames, 3);
        assert_eq!(config.matching.cosine_threshold, 0.40);
        assert_eq!(config.face_timeout(), chrono::Duration::minutes(5));
        assert!(config.model_paths().detector.ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            backend = "standard"
            data_dir = "/srv/rollcall"

            [matching]
            distance_tolerance = 0.6

            [debounce]
            min_consecutive_frames = 4
            immediate_distance = 0.35

            [sessions]
            face_timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Standard);
        assert_eq!(config.data_dir, PathBuf::from("/srv/rollcall"));
        assert_eq!(config.matching.distance_tolerance, 0.6);
        assert_eq!(config.matching.distance_margin, MatchPolicy::default().distance_margin);
        assert_eq!(config.debounce.immediate_distance, Some(0.35));
        assert_eq!(config.debounce.immediate_cosine, None);
        assert_eq!(config.sessions.face_timeout_secs, 120);
        assert_eq!(config.sessions.sweep_interval_secs, 60);
    }

    #[test]
    fn test_one_guard_for_matcher_and_immediate_path() {
        let config = Config::from_toml_str(
            r#"
            [matching]
            cosine_distance_guard = 0.5

            [debounce]
            immediate_cosine = 0.97
            "#,
        )
        .unwrap();
        let options = crate::service::ServiceOptions::from_config(&config);
        assert_eq!(options.matching.cosine_distance_guard, 0.5);

        let strong_cosine = rollcall_core::Matched {
            identity_id: "s1".into(),
            reason: rollcall_core::MatchReason::Template,
            confidence: 0.9,
            distance: 0.9,
            cosine: 0.98,
        };
        let mut debouncer = rollcall_core::Debouncer::new();
        let confirmed = debouncer.observe(
            &[strong_cosine],
            &options.debounce,
            options.matching.cosine_distance_guard,
        );
        assert!(confirmed.is_empty());
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "max_faces = \"many\"").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("rollcall.toml"));
    }

    #[test]
    fn test_validate_rejects_zero_frames() {
        let mut config = Config::default();
        config.debounce.min_consecutive_frames = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides() {
        // The only test that touches these variables.
        std::env::set_var("ROLLCALL_COSINE_MARGIN", "0.12");
        std::env::set_var("ROLLCALL_IMMEDIATE_COSINE", "0.8");
        std::env::set_var("ROLLCALL_MIN_CONSECUTIVE_FRAMES", "not-a-number");

        let mut config = Config::default();
        config.apply_env();

        std::env::remove_var("ROLLCALL_COSINE_MARGIN");
        std::env::remove_var("ROLLCALL_IMMEDIATE_COSINE");
        std::env::remove_var("ROLLCALL_MIN_CONSECUTIVE_FRAMES");

        assert_eq!(config.matching.cosine_margin, 0.12);
        assert_eq!(config.debounce.immediate_cosine, Some(0.8));
        assert_eq!(config.debounce.min_consecutive_frames, 3);
    }

    #[test]
    fn test_env_opt_disables() {
        std::env::set_var("ROLLCALL_TEST_OPT_OFF", "off");
        assert_eq!(env_opt_f32("ROLLCALL_TEST_OPT_OFF", Some(0.3)), None);
        std::env::remove_var("ROLLCALL_TEST_OPT_OFF");
        assert_eq!(env_opt_f32("ROLLCALL_TEST_OPT_OFF", Some(0.3)), Some(0.3));
    }
}
