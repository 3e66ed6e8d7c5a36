use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Whether a reconnect with an unchanged local track re-arms resume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeRearm {
    /// Every new connection epoch may consume one snapshot
    OnReconnect,
    /// Only a local track change re-arms resume; a reconnect keeps `Applied`
    OnTrackChangeOnly,
}

impl ResumeRearm {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "on-reconnect" => Some(ResumeRearm::OnReconnect),
            "on-track-change" => Some(ResumeRearm::OnTrackChangeOnly),
            _ => None,
        }
    }
}

/// Sync client configuration
/// In debug builds: loads .env first, then reads environment variables
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// WebSocket endpoint of the playback-state backend
    pub server_url: String,
    /// Minimum gap between two outbound sync messages
    pub min_interval: Duration,
    /// Period of the recurring sync attempt
    pub cadence: Duration,
    /// Delay before the transport re-attempts a lost connection
    pub reconnect_delay: Duration,
    pub resume_rearm: ResumeRearm,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_url: "wss://localhost:8443/playback".to_string(),
            min_interval: Duration::from_secs(4),
            cadence: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            resume_rearm: ResumeRearm::OnReconnect,
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when the environment is invalid
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            }
        }

        match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                warn!("Config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_url = lookup("LISTEN_SYNC_URL").unwrap_or(defaults.server_url);
        let min_interval = millis(&lookup, "LISTEN_SYNC_MIN_INTERVAL_MS")?
            .unwrap_or(defaults.min_interval);
        let cadence = millis(&lookup, "LISTEN_SYNC_CADENCE_MS")?.unwrap_or(defaults.cadence);
        let reconnect_delay = millis(&lookup, "LISTEN_SYNC_RECONNECT_DELAY_MS")?
            .unwrap_or(defaults.reconnect_delay);

        let resume_rearm = match lookup("LISTEN_SYNC_RESUME_REARM") {
            Some(value) => ResumeRearm::parse(&value).ok_or(ConfigError::InvalidValue {
                key: "LISTEN_SYNC_RESUME_REARM",
                value,
            })?,
            None => defaults.resume_rearm,
        };

        let config = Self {
            server_url,
            min_interval,
            cadence,
            reconnect_delay,
            resume_rearm,
        };
        config.validate()?;

        info!(
            "Config: server={} min_interval={:?} cadence={:?}",
            config.server_url, config.min_interval, config.cadence
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("min_interval"));
        }
        if self.cadence.is_zero() {
            return Err(ConfigError::ZeroDuration("cadence"));
        }
        Ok(())
    }
}

fn millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("LISTEN_SYNC_URL", "ws://127.0.0.1:9000/ws"),
            ("LISTEN_SYNC_MIN_INTERVAL_MS", "1500"),
            ("LISTEN_SYNC_CADENCE_MS", "3000"),
            ("LISTEN_SYNC_RESUME_REARM", "on-track-change"),
        ]))
        .unwrap();

        assert_eq!(config.server_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.min_interval, Duration::from_millis(1500));
        assert_eq!(config.cadence, Duration::from_secs(3));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.resume_rearm, ResumeRearm::OnTrackChangeOnly);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = Config::from_lookup(lookup_from(&[("LISTEN_SYNC_CADENCE_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "LISTEN_SYNC_CADENCE_MS",
                value: "soon".to_string()
            }
        );

        let err = Config::from_lookup(lookup_from(&[("LISTEN_SYNC_MIN_INTERVAL_MS", "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroDuration("min_interval"));

        assert!(Config::from_lookup(lookup_from(&[("LISTEN_SYNC_RESUME_REARM", "never")])).is_err());
    }
}
