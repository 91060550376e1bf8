use rollcall_core::DedupPolicy;
use rollcall_hw::VideoSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Ledger deduplication rule as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Daily,
    Cooldown,
}

impl std::str::FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "cooldown" => Ok(Self::Cooldown),
            other => Err(ConfigError::Invalid(format!(
                "unknown policy {other:?} (expected \"daily\" or \"cooldown\")"
            ))),
        }
    }
}

/// Application configuration: TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One reference image per registered person.
    pub gallery_dir: PathBuf,
    /// Attendance CSV.
    pub ledger_path: PathBuf,
    /// Directory holding det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Local camera index, used when no phone host is set.
    pub camera_index: u32,
    /// Phone camera host; when set, frames come from `http://host:port/video`.
    pub phone_host: Option<String>,
    pub phone_port: u16,
    pub policy: PolicyKind,
    /// Cooldown policy: minimum seconds between two rows for one person.
    pub cooldown_secs: u64,
    /// Maximum Euclidean distance between unit embeddings for a match.
    pub match_tolerance: f32,
    /// Resize factor applied to frames before detection.
    pub detect_scale: f32,
    /// Frames discarded after opening the source (auto exposure settling).
    pub warmup_frames: usize,
    /// Registration: captures attempted before giving up on finding a face.
    pub register_attempts: usize,
    /// Write names to the ledger upper-cased.
    pub uppercase_names: bool,
    /// Annotated frames are written here during a session, if set.
    pub preview_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            gallery_dir: data_dir.join("attendance_images"),
            ledger_path: data_dir.join("attendance.csv"),
            model_dir: data_dir.join("models"),
            camera_index: 0,
            phone_host: None,
            phone_port: 4747,
            policy: PolicyKind::Daily,
            cooldown_secs: 10,
            match_tolerance: 1.10,
            detect_scale: 0.25,
            warmup_frames: 4,
            register_attempts: 3,
            uppercase_names: true,
            preview_path: None,
        }
    }
}

impl Config {
    /// Load from `path` (must exist) or the default location (optional),
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = default_config_path();
                if default.is_file() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("ROLLCALL_GALLERY_DIR") {
            self.gallery_dir = v.into();
        }
        if let Some(v) = var("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = v.into();
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = v.into();
        }
        if let Some(v) = var("ROLLCALL_PHONE_HOST") {
            self.phone_host = Some(v).filter(|h| !h.is_empty());
        }
        if let Some(v) = var("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ROLLCALL_POLICY") {
            self.policy = v.parse()?;
        }
        env_parse(&var, "ROLLCALL_CAMERA_INDEX", &mut self.camera_index);
        env_parse(&var, "ROLLCALL_PHONE_PORT", &mut self.phone_port);
        env_parse(&var, "ROLLCALL_COOLDOWN_SECS", &mut self.cooldown_secs);
        env_parse(&var, "ROLLCALL_MATCH_TOLERANCE", &mut self.match_tolerance);
        env_parse(&var, "ROLLCALL_DETECT_SCALE", &mut self.detect_scale);
        env_parse(&var, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&var, "ROLLCALL_REGISTER_ATTEMPTS", &mut self.register_attempts);
        if let Some(v) = var("ROLLCALL_UPPERCASE_NAMES") {
            self.uppercase_names = v != "0";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.detect_scale > 0.0 && self.detect_scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "detect_scale must be in (0, 1], got {}",
                self.detect_scale
            )));
        }
        if !(self.match_tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "match_tolerance must be positive, got {}",
                self.match_tolerance
            )));
        }
        if self.register_attempts == 0 {
            return Err(ConfigError::Invalid("register_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn video_source(&self) -> VideoSource {
        match &self.phone_host {
            Some(host) => VideoSource::phone(host, self.phone_port),
            None => VideoSource::Device(self.camera_index),
        }
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        match self.policy {
            PolicyKind::Daily => DedupPolicy::Daily,
            PolicyKind::Cooldown => DedupPolicy::Cooldown(Duration::from_secs(self.cooldown_secs)),
        }
    }
}

/// Set `slot` from `key` when it is present and parses; otherwise keep it.
fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = var(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("rollcall")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("rollcall/config.toml")
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
