//! Aligner configuration – reads/writes `~/.fidalign/config.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use fidalign_hal::DEFAULT_TRAJECTORY_ACTION;
use fidalign_middleware::DEFAULT_ROSBRIDGE_URL;
use fidalign_perception::AcquisitionPolicy;
use fidalign_runtime::SessionConfig;
use fidalign_types::AlignError;
use serde::{Deserialize, Serialize};

/// Where goals go and transforms come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A live robot behind `rosbridge_server`.
    #[default]
    Rosbridge,
    /// In-process simulated base and marker.
    Sim,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Rosbridge => write!(f, "rosbridge"),
            Backend::Sim => write!(f, "sim"),
        }
    }
}

impl FromStr for Backend {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rosbridge" => Ok(Backend::Rosbridge),
            "sim" => Ok(Backend::Sim),
            other => Err(AlignError::Config(format!(
                "unknown backend '{other}' (expected 'rosbridge' or 'sim')"
            ))),
        }
    }
}

/// Marker pose in the simulated world (the base starts at the origin facing
/// +x).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimMarker {
    pub x: f64,
    pub y: f64,
    pub yaw_rad: f64,
}

impl Default for SimMarker {
    fn default() -> Self {
        Self {
            x: 1.5,
            y: 0.5,
            yaw_rad: 1.570_796_3,
        }
    }
}

/// Persisted configuration stored in `~/.fidalign/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Marker frame to align to.
    #[serde(default = "default_marker_name")]
    pub marker_name: String,

    #[serde(default = "default_base_frame")]
    pub base_frame: String,

    /// Standoff distance from the marker (m).
    #[serde(default = "default_offset")]
    pub offset_m: f64,

    #[serde(default = "default_acquisition_timeout")]
    pub acquisition_timeout_secs: f64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Trajectory duration of each motion step.
    #[serde(default = "default_step_duration")]
    pub step_duration_secs: f64,

    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: f64,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    #[serde(default = "default_trajectory_action")]
    pub trajectory_action: String,

    #[serde(default)]
    pub sim_marker: SimMarker,
}

fn default_marker_name() -> String {
    "bowl".to_string()
}
fn default_base_frame() -> String {
    "base_link".to_string()
}
fn default_offset() -> f64 {
    fidalign_runtime::DEFAULT_OFFSET_M
}
fn default_acquisition_timeout() -> f64 {
    120.0
}
fn default_poll_interval() -> f64 {
    1.0
}
fn default_step_duration() -> f64 {
    5.0
}
fn default_server_timeout() -> f64 {
    60.0
}
fn default_rosbridge_url() -> String {
    DEFAULT_ROSBRIDGE_URL.to_string()
}
fn default_trajectory_action() -> String {
    DEFAULT_TRAJECTORY_ACTION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            marker_name: default_marker_name(),
            base_frame: default_base_frame(),
            offset_m: default_offset(),
            acquisition_timeout_secs: default_acquisition_timeout(),
            poll_interval_secs: default_poll_interval(),
            step_duration_secs: default_step_duration(),
            server_timeout_secs: default_server_timeout(),
            backend: Backend::default(),
            rosbridge_url: default_rosbridge_url(),
            trajectory_action: default_trajectory_action(),
            sim_marker: SimMarker::default(),
        }
    }
}

impl Config {
    /// Reject values the aligner cannot run with.
    pub fn validate(&self) -> Result<(), AlignError> {
        if self.marker_name.trim().is_empty() {
            return Err(AlignError::Config("marker_name must not be empty".to_string()));
        }
        if self.base_frame.trim().is_empty() {
            return Err(AlignError::Config("base_frame must not be empty".to_string()));
        }
        if !self.offset_m.is_finite() {
            return Err(AlignError::Config(format!(
                "offset_m must be finite, got {}",
                self.offset_m
            )));
        }
        for (name, value) in [
            ("acquisition_timeout_secs", self.acquisition_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("step_duration_secs", self.step_duration_secs),
            ("server_timeout_secs", self.server_timeout_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(AlignError::Config(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Session parameters.  Call [`Config::validate`] first.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_frame: self.base_frame.clone(),
            marker_frame: self.marker_name.clone(),
            offset: self.offset_m,
            acquisition: AcquisitionPolicy::new(
                Duration::from_secs_f64(self.acquisition_timeout_secs),
                Duration::from_secs_f64(self.poll_interval_secs),
            ),
            server_timeout: Duration::from_secs_f64(self.server_timeout_secs),
            step_duration: Duration::from_secs_f64(self.step_duration_secs),
        }
    }
}

/// Return the path to `~/.fidalign/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fidalign").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns `None`
/// if the file does not exist.
pub fn load() -> Result<Option<Config>, AlignError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, AlignError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| AlignError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| AlignError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `FIDALIGN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FIDALIGN_MARKER` | `marker_name` |
/// | `FIDALIGN_OFFSET` | `offset_m` |
/// | `FIDALIGN_BACKEND` | `backend` |
/// | `FIDALIGN_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `FIDALIGN_TIMEOUT` | `acquisition_timeout_secs` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("FIDALIGN_MARKER") {
        cfg.marker_name = v;
    }
    if let Some(v) = lookup("FIDALIGN_OFFSET")
        && let Ok(offset) = v.trim().parse::<f64>()
    {
        cfg.offset_m = offset;
    }
    if let Some(v) = lookup("FIDALIGN_BACKEND")
        && let Ok(backend) = v.parse::<Backend>()
    {
        cfg.backend = backend;
    }
    if let Some(v) = lookup("FIDALIGN_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Some(v) = lookup("FIDALIGN_TIMEOUT")
        && let Ok(secs) = v.trim().parse::<f64>()
    {
        cfg.acquisition_timeout_secs = secs;
    }
}

/// Save the config to disk, creating `~/.fidalign/` if necessary.
pub fn save(cfg: &Config) -> Result<(), AlignError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), AlignError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AlignError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                AlignError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| AlignError::Serialization(format!("failed to serialise config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| AlignError::Config(format!("failed to write {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| AlignError::Config(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}
