use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// CLI configuration: defaults, then the TOML file, then `ROLLCALL_*` variables.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL (default: http://localhost:8000).
    pub api_base: String,
    /// Bearer token for teacher-only endpoints.
    pub token: Option<String>,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Number of warmup frames to discard before the camera reports ready.
    pub warmup_frames: usize,
    /// Seconds to wait for the camera to become ready.
    pub ready_timeout_secs: u64,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Re-query interval for `verdict --watch`.
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            token: None,
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            ready_timeout_secs: 5,
            request_timeout_secs: 30,
            poll_interval_secs: 30,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("camera_device", &self.camera_device)
            .field("warmup_frames", &self.warmup_frames)
            .field("ready_timeout_secs", &self.ready_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (must exist when set) or
    /// `$XDG_CONFIG_HOME/rollcall/config.toml` (optional), then apply the
    /// environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("ROLLCALL_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = get("ROLLCALL_TOKEN") {
            self.token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = get("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        override_parsed(&get, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        override_parsed(&get, "ROLLCALL_READY_TIMEOUT_SECS", &mut self.ready_timeout_secs);
        override_parsed(&get, "ROLLCALL_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_parsed(&get, "ROLLCALL_POLL_INTERVAL_SECS", &mut self.poll_interval_secs);
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Never below one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("rollcall").join("config.toml"))
}

fn override_parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = get(key) else { return };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}
