use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    #[serde(skip_serializing, default)]
    pub discord_token: Option<String>,

    // Paths
    pub data_dir: PathBuf,
    pub audio_dir: PathBuf,

    // Reproducción
    #[serde(with = "humantime_serde_compat")]
    pub status_interval: Duration,
    #[serde(with = "humantime_serde_compat")]
    pub pause_poll_interval: Duration,
    pub event_queue_size: usize,
    #[serde(with = "humantime_serde_compat")]
    pub frame_pacing: Duration,

    // Rendimiento
    pub worker_threads: usize,
}

/// Runtime knobs handed to every guild player.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub status_interval: Duration,
    pub pause_poll_interval: Duration,
    pub event_queue_size: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(1),
            pause_poll_interval: Duration::from_millis(100),
            event_queue_size: 64,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),

            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            audio_dir: std::env::var("AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_dir),

            status_interval: env_duration("STATUS_INTERVAL", defaults.status_interval)?,
            pause_poll_interval: env_duration("PAUSE_POLL_INTERVAL", defaults.pause_poll_interval)?,
            event_queue_size: std::env::var("EVENT_QUEUE_SIZE")
                .unwrap_or_else(|_| defaults.event_queue_size.to_string())
                .parse()
                .context("EVENT_QUEUE_SIZE inválido")?,
            frame_pacing: env_duration("FRAME_PACING", defaults.frame_pacing)?,

            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse().context("WORKER_THREADS inválido")?,
                _ => defaults.worker_threads,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Intervals must be non-zero
    /// - The event queue must hold at least one event
    /// - At least one worker thread
    pub fn validate(&self) -> Result<()> {
        if self.status_interval.is_zero() {
            anyhow::bail!("Status interval must be greater than 0");
        }

        if self.pause_poll_interval.is_zero() {
            anyhow::bail!("Pause poll interval must be greater than 0");
        }

        if self.pause_poll_interval > Duration::from_secs(5) {
            anyhow::bail!(
                "Pause poll interval too high, maximum 5s, got: {}",
                humantime::format_duration(self.pause_poll_interval)
            );
        }

        if self.event_queue_size == 0 {
            anyhow::bail!("Event queue size must be greater than 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        Ok(())
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            status_interval: self.status_interval,
            pause_poll_interval: self.pause_poll_interval,
            event_queue_size: self.event_queue_size,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never printed.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: {}\n  \
            Paths: data={} audio={}\n  \
            Playback: status every {}, pause poll {}, {} queued events, {} frame pacing\n  \
            Workers: {}",
            if self.discord_token.is_some() { "token configured" } else { "log-only status" },
            self.data_dir.display(),
            self.audio_dir.display(),
            humantime::format_duration(self.status_interval),
            humantime::format_duration(self.pause_poll_interval),
            self.event_queue_size,
            humantime::format_duration(self.frame_pacing),
            self.worker_threads
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: None,

            data_dir: "./data".into(),
            audio_dir: "./audio".into(),

            status_interval: Duration::from_secs(1),
            pause_poll_interval: Duration::from_millis(100),
            event_queue_size: 64,
            frame_pacing: Duration::from_millis(20), // 20ms @ 48kHz

            worker_threads: num_cpus::get(),
        }
    }
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("{} inválido: {}", key, val)),
        _ => Ok(default),
    }
}

/// Serializes durations in humantime notation ("1s", "100ms").
mod humantime_serde_compat {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
