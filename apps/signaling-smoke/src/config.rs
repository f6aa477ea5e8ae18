//! Environment-backed configuration for `signaling-smoke`.

use std::{env, error::Error, fmt};

use signaling_core::{
    RetryPolicy,
    retry::{PUBLISH_BACKOFF_JITTER_MS, PUBLISH_BACKOFF_MS, PUBLISH_MAX_ATTEMPTS},
};
use signaling_transport::TransportConfig;

const DEFAULT_ACCESS_TOKEN: &str = "smoke-access-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub room_name: Option<String>,
    pub access_token: String,
    pub user_agent: String,
    pub retry: RetryPolicy,
    pub network_quality: bool,
    pub dominant_speaker: bool,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let room_name = optional_trimmed_env("RSP_ROOM_NAME", &mut lookup);
        let access_token = optional_trimmed_env("RSP_ACCESS_TOKEN", &mut lookup)
            .unwrap_or_else(|| DEFAULT_ACCESS_TOKEN.to_owned());
        let user_agent = optional_trimmed_env("RSP_USER_AGENT", &mut lookup)
            .unwrap_or_else(|| format!("signaling-smoke/{}", env!("CARGO_PKG_VERSION")));

        let max_attempts =
            parse_optional_u32("RSP_PUBLISH_MAX_ATTEMPTS", PUBLISH_MAX_ATTEMPTS, &mut lookup)?;
        let backoff_ms =
            parse_optional_u64("RSP_PUBLISH_BACKOFF_MS", PUBLISH_BACKOFF_MS, &mut lookup)?;
        let jitter_ms =
            parse_optional_u64("RSP_PUBLISH_JITTER_MS", PUBLISH_BACKOFF_JITTER_MS, &mut lookup)?;

        let network_quality = parse_optional_bool("RSP_NETWORK_QUALITY", false, &mut lookup)?;
        let dominant_speaker = parse_optional_bool("RSP_DOMINANT_SPEAKER", false, &mut lookup)?;

        if jitter_ms > backoff_ms {
            return Err(ConfigError::InvalidValue {
                key: "RSP_PUBLISH_JITTER_MS",
                value: jitter_ms.to_string(),
                reason: format!("must not exceed RSP_PUBLISH_BACKOFF_MS ({backoff_ms})"),
            });
        }

        Ok(Self {
            room_name,
            access_token,
            user_agent,
            retry: RetryPolicy::new(max_attempts, backoff_ms, jitter_ms),
            network_quality,
            dominant_speaker,
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            name: self.room_name.clone(),
            access_token: self.access_token.clone(),
            user_agent: self.user_agent.clone(),
            network_quality: self.network_quality,
            dominant_speaker: self.dominant_speaker,
            retry: self.retry,
            ..TransportConfig::default()
        }
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u32<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(
    key: &'static str,
    default: bool,
    lookup: &mut F,
) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean (true/false, 1/0, yes/no, on/off)".to_owned(),
        }),
    }
}
