use scout_core::DEFAULT_MATCH_THRESHOLD;
use scout_hw::{RetryPolicy, SourceConfig};
use std::path::PathBuf;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera device path or `http(s)://` MJPEG URL (default: /dev/video0).
    pub source: String,
    /// Directory of enrolled stills; enrollment captures are written here too.
    pub gallery_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance at or below which a face matches.
    pub match_threshold: f32,
    /// Linear downscale applied before detection (1 disables).
    pub downscale: u32,
    /// Fixed pause after every pipeline cycle.
    pub cycle_delay: Duration,
    /// Network read timeout; an expired read is an empty cycle.
    pub read_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_backoff: Duration,
    /// `sim`, or a serial device path such as /dev/rfcomm0.
    pub actuator: String,
    /// Minimum interval between automatic `Open` commands.
    pub open_cooldown: Duration,
}

impl Config {
    /// Load configuration from `SCOUT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("scout");

        Self {
            source: std::env::var("SCOUT_SOURCE").unwrap_or_else(|_| "/dev/video0".to_string()),
            gallery_dir: std::env::var("SCOUT_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("gallery")),
            model_dir: std::env::var("SCOUT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models")),
            match_threshold: env_f32("SCOUT_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            downscale: env_u32("SCOUT_DOWNSCALE", 4).max(1),
            cycle_delay: Duration::from_millis(env_u64("SCOUT_CYCLE_DELAY_MS", 30)),
            read_timeout: Duration::from_millis(env_u64("SCOUT_READ_TIMEOUT_MS", 5000)),
            retry_max_attempts: env_u32("SCOUT_RETRY_MAX_ATTEMPTS", 5),
            retry_backoff: Duration::from_millis(env_u64("SCOUT_RETRY_BACKOFF_MS", 500)),
            actuator: std::env::var("SCOUT_ACTUATOR").unwrap_or_else(|_| "sim".to_string()),
            open_cooldown: Duration::from_millis(env_u64("SCOUT_OPEN_COOLDOWN_MS", 2000)),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig::parse(&self.source, self.read_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: self.retry_backoff,
            max_backoff: MAX_BACKOFF.max(self.retry_backoff),
        }
    }
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

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
