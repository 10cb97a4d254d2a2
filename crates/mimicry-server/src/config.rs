use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use mimicry_core::net::protocol::DEFAULT_TICK_RATE_HZ;
use mimicry_core::round::RoundConfig;

/// Path of the config file read when `MIMICRY_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "mimicry.toml";

/// Top-level server configuration, loaded from `mimicry.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick_rate_hz: f32,
    /// Base seed; round `n` is seeded with `seed + n`.
    pub seed: u64,
    pub rounds: RoundsConfig,
    pub limits: LimitsConfig,
    pub bots: BotsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ as f32,
            seed: 0,
            rounds: RoundsConfig::default(),
            limits: LimitsConfig::default(),
            bots: BotsConfig::default(),
        }
    }
}

/// Round sequencing for one session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundsConfig {
    pub round_count: u8,
    pub round_duration_secs: u64,
    pub between_round_secs: u64,
    pub max_participants: u8,
    /// One pursuer per this many participants, at least one.
    pub participants_per_pursuer: usize,
}

impl Default for RoundsConfig {
    fn default() -> Self {
        let round = RoundConfig::default();
        Self {
            round_count: round.round_count,
            round_duration_secs: round.round_duration.as_secs(),
            between_round_secs: round.between_round_duration.as_secs(),
            max_participants: round.max_participants,
            participants_per_pursuer: 4,
        }
    }
}

impl RoundsConfig {
    pub fn to_round_config(&self) -> RoundConfig {
        RoundConfig {
            max_participants: self.max_participants,
            round_count: self.round_count,
            round_duration: Duration::from_secs(self.round_duration_secs),
            between_round_duration: Duration::from_secs(self.between_round_secs),
        }
    }
}

/// Per-connection limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Request token refill rate per connection.
    pub request_rate_per_sec: f64,
    /// Request burst allowance per connection.
    pub request_burst: f64,
    /// Snapshot request refill rate per connection.
    pub resync_rate_per_sec: f64,
    pub resync_burst: f64,
    /// Outbound buffer per connection, in messages.
    pub participant_message_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_rate_per_sec: 60.0,
            request_burst: 30.0,
            resync_rate_per_sec: 0.5,
            resync_burst: 2.0,
            participant_message_buffer: 256,
        }
    }
}

/// Bot participants added to fill a session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotsConfig {
    pub evaders: usize,
    pub pursuers: usize,
}

/// Why a configuration could not be used.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: String,
        source: std::io::Error,
    },
    Parse {
        path: String,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "failed to read {path}: {source}"),
            Self::Parse { path, source } => write!(f, "failed to parse {path}: {source}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

impl ServerConfig {
    /// Reject values the tick loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tick_rate_hz.is_finite() || self.tick_rate_hz <= 0.0 || self.tick_rate_hz > 240.0 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate_hz must be in (0, 240], got {}",
                self.tick_rate_hz
            )));
        }
        if self.rounds.round_count == 0 {
            return Err(ConfigError::Invalid("rounds.round_count must be > 0".into()));
        }
        if self.rounds.round_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "rounds.round_duration_secs must be > 0".into(),
            ));
        }
        if self.rounds.max_participants < 2 {
            return Err(ConfigError::Invalid(
                "rounds.max_participants must be >= 2".into(),
            ));
        }
        if self.rounds.participants_per_pursuer == 0 {
            return Err(ConfigError::Invalid(
                "rounds.participants_per_pursuer must be > 0".into(),
            ));
        }
        if self.limits.request_rate_per_sec <= 0.0 || self.limits.request_burst < 1.0 {
            return Err(ConfigError::Invalid(
                "limits.request_rate_per_sec must be > 0 and limits.request_burst >= 1".into(),
            ));
        }
        if !(self.limits.resync_rate_per_sec.is_finite() && self.limits.resync_rate_per_sec > 0.0)
            || !(self.limits.resync_burst >= 1.0)
        {
            return Err(ConfigError::Invalid(
                "limits.resync_rate_per_sec must be > 0 and limits.resync_burst >= 1".into(),
            ));
        }
        if self.limits.participant_message_buffer == 0 {
            return Err(ConfigError::Invalid(
                "limits.participant_message_buffer must be > 0".into(),
            ));
        }
        if self.bots.evaders + self.bots.pursuers > usize::from(self.rounds.max_participants) {
            return Err(ConfigError::Invalid(
                "bots exceed rounds.max_participants".into(),
            ));
        }
        Ok(())
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Load from `MIMICRY_CONFIG` or `mimicry.toml` if present, then apply
    /// env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("MIMICRY_CONFIG") {
            Ok(path) if !path.is_empty() => {
                let config = Self::from_file(Path::new(&path))?;
                tracing::info!(path = %path, "Loaded configuration");
                config
            },
            _ if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                let config = Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?;
                tracing::info!("Loaded configuration from {DEFAULT_CONFIG_PATH}");
                config
            },
            _ => {
                tracing::info!("No {DEFAULT_CONFIG_PATH} found, using defaults");
                Self::default()
            },
        };

        if let Ok(val) = std::env::var("MIMICRY_TICK_RATE")
            && let Ok(n) = val.parse::<f32>()
        {
            config.tick_rate_hz = n;
        }
        if let Ok(val) = std::env::var("MIMICRY_SEED")
            && let Ok(n) = val.parse::<u64>()
        {
            config.seed = n;
        }
        if let Ok(val) = std::env::var("MIMICRY_ROUND_COUNT")
            && let Ok(n) = val.parse::<u8>()
        {
            config.rounds.round_count = n;
        }

        config.validate()?;
        Ok(config)
    }
}
