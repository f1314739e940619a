//! Configuration Vault – reads/writes `~/.strider/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strider_kernel::{MotionLimits, SafetyThresholds};
use strider_runtime::{CommandTable, SchedulerConfig};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// `[sensor]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor poll period.
    pub period_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { period_ms: 100 }
    }
}

impl SensorConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

/// `[vision]` section: where to send camera frames for a navigation decision.
// Per-field serde defaults (equivalent to a container-level `#[serde(default)]`,
// which cannot move fields out of a `Drop` type such as this one).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct VisionConfig {
    /// Base URL of an OpenAI-compatible endpoint (Ollama by default).
    #[serde(default = "VisionConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "VisionConfig::default_model")]
    pub model: String,
    /// Minimum spacing between two requests.  Zero disables rate limiting.
    #[serde(default = "VisionConfig::default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    /// Bearer token (stored as plain text; the file is written owner-only).
    #[serde(default = "VisionConfig::default_api_key")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl VisionConfig {
    fn default_base_url() -> String {
        Self::default().base_url.clone()
    }
    fn default_model() -> String {
        Self::default().model.clone()
    }
    fn default_min_request_interval_ms() -> u64 {
        Self::default().min_request_interval_ms
    }
    fn default_api_key() -> String {
        Self::default().api_key.clone()
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llava".to_string(),
            min_request_interval_ms: 1000,
            api_key: String::new(),
        }
    }
}

impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

impl VisionConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// The API key as a self-wiping copy, or `None` when unset.
    pub fn api_key(&self) -> Option<Zeroizing<String>> {
        if self.api_key.is_empty() {
            None
        } else {
            Some(Zeroizing::new(self.api_key.clone()))
        }
    }
}

/// Persisted configuration stored in `~/.strider/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub safety: SafetyThresholds,
    pub limits: MotionLimits,
    pub commands: CommandTable,
    pub scheduler: SchedulerConfig,
    pub sensor: SensorConfig,
    pub vision: VisionConfig,
}

/// Return the path to `~/.strider/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strider").join("config.toml")
}

/// Load the config from `path`, or from the default location.
///
/// A missing file is not an error: defaults are used, with environment
/// overrides still applied.
pub fn load(path: Option<&Path>) -> Result<Config, String> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = load_from(&path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `STRIDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIDER_VISION_URL` | `vision.base_url` |
/// | `STRIDER_VISION_MODEL` | `vision.model` |
/// | `STRIDER_VISION_API_KEY` | `vision.api_key` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STRIDER_VISION_URL") {
        cfg.vision.base_url = v;
    }
    if let Ok(v) = std::env::var("STRIDER_VISION_MODEL") {
        cfg.vision.model = v;
    }
    if let Ok(v) = std::env::var("STRIDER_VISION_API_KEY") {
        cfg.vision.api_key.zeroize();
        cfg.vision.api_key = v;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = Zeroizing::new(
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?,
    );
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw.as_bytes())
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
