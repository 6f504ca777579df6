use std::{
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4173";
pub const DEFAULT_FANOUT_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    /// Directory holding `env.json`, `env` and `.env`.
    pub env_dir: PathBuf,
    /// When set, env documents are fetched from `<base>/<name>` instead of `env_dir`.
    pub env_base_url: Option<String>,
    /// Script-provided configuration map, highest precedence.
    pub inline_env: Vec<(String, String)>,
    pub fanout_capacity: usize,
    pub webhook_timeout_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid FACE_BROKER_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid FACE_BROKER_FANOUT_CAPACITY: {0}")]
    InvalidFanoutCapacity(String),
    #[error("invalid FACE_BROKER_WEBHOOK_TIMEOUT_MS: {0}")]
    InvalidWebhookTimeoutMs(String),
    #[error("invalid inline env entry (expected KEY=VALUE): {0}")]
    InvalidInlineEntry(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "face-broker".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4173)),
            env_dir: PathBuf::from("."),
            env_base_url: None,
            inline_env: Vec::new(),
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
            webhook_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_lookup(|key| env::var(key).ok())
    }

    pub fn from_env_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("FACE_BROKER_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()?;
        let service_name =
            lookup("FACE_BROKER_SERVICE_NAME").unwrap_or_else(|| "face-broker".to_string());
        let env_dir = lookup("FACE_BROKER_ENV_DIR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let env_base_url = lookup("FACE_BROKER_ENV_BASE_URL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let fanout_capacity = parse_fanout_capacity(lookup("FACE_BROKER_FANOUT_CAPACITY"))?;
        let webhook_timeout_ms =
            parse_webhook_timeout_ms(lookup("FACE_BROKER_WEBHOOK_TIMEOUT_MS"))?;

        Ok(Self {
            service_name,
            bind_addr,
            env_dir,
            env_base_url,
            inline_env: Vec::new(),
            fanout_capacity,
            webhook_timeout_ms,
        })
    }
}

fn parse_fanout_capacity(raw: Option<String>) -> Result<usize, ConfigError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_FANOUT_CAPACITY);
    };
    let capacity = raw
        .trim()
        .parse::<usize>()
        .map_err(|error| ConfigError::InvalidFanoutCapacity(error.to_string()))?;
    if capacity == 0 {
        return Err(ConfigError::InvalidFanoutCapacity(
            "capacity must be at least 1".to_string(),
        ));
    }
    Ok(capacity)
}

/// Unset, blank or `0` disables the outbound timeout.
fn parse_webhook_timeout_ms(raw: Option<String>) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = raw.map(|value| value.trim().to_string()) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    let timeout_ms = raw
        .parse::<u64>()
        .map_err(|error| ConfigError::InvalidWebhookTimeoutMs(error.to_string()))?;
    Ok((timeout_ms > 0).then_some(timeout_ms))
}

/// Parses a `KEY=VALUE` pair given on the command line.
pub fn parse_inline_entry(raw: &str) -> Result<(String, String), ConfigError> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(ConfigError::InvalidInlineEntry(raw.to_string()));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidInlineEntry(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_env_lookup(|_| None).expect("config");
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.service_name, "face-broker");
        assert_eq!(config.env_dir, PathBuf::from("."));
        assert_eq!(config.env_base_url, None);
        assert_eq!(config.fanout_capacity, DEFAULT_FANOUT_CAPACITY);
        assert_eq!(config.webhook_timeout_ms, None);
    }

    #[test]
    fn overrides_are_read_from_lookup() {
        let config = Config::from_env_lookup(lookup_from(&[
            ("FACE_BROKER_BIND_ADDR", "0.0.0.0:9000"),
            ("FACE_BROKER_ENV_DIR", "/srv/face"),
            ("FACE_BROKER_ENV_BASE_URL", " http://cdn.test/face "),
            ("FACE_BROKER_FANOUT_CAPACITY", "8"),
            ("FACE_BROKER_WEBHOOK_TIMEOUT_MS", "1500"),
        ]))
        .expect("config");
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.env_dir, PathBuf::from("/srv/face"));
        assert_eq!(config.env_base_url.as_deref(), Some("http://cdn.test/face"));
        assert_eq!(config.fanout_capacity, 8);
        assert_eq!(config.webhook_timeout_ms, Some(1500));
    }

    #[test]
    fn zero_timeout_means_none_and_zero_capacity_is_rejected() {
        let config = Config::from_env_lookup(lookup_from(&[(
            "FACE_BROKER_WEBHOOK_TIMEOUT_MS",
            "0",
        )]))
        .expect("config");
        assert_eq!(config.webhook_timeout_ms, None);

        let error = Config::from_env_lookup(lookup_from(&[("FACE_BROKER_FANOUT_CAPACITY", "0")]))
            .expect_err("zero capacity");
        assert!(matches!(error, ConfigError::InvalidFanoutCapacity(_)));
    }

    #[test]
    fn malformed_values_are_reported() {
        assert!(matches!(
            Config::from_env_lookup(lookup_from(&[("FACE_BROKER_BIND_ADDR", "nope")])),
            Err(ConfigError::BindAddrParse(_))
        ));
        assert!(matches!(
            Config::from_env_lookup(lookup_from(&[("FACE_BROKER_WEBHOOK_TIMEOUT_MS", "soon")])),
            Err(ConfigError::InvalidWebhookTimeoutMs(_))
        ));
    }

    #[test]
    fn inline_entries_split_at_first_equals() {
        assert_eq!(
            parse_inline_entry("WEBHOOK_URL=https://hooks.test/a?b=c").expect("entry"),
            (
                "WEBHOOK_URL".to_string(),
                "https://hooks.test/a?b=c".to_string()
            )
        );
        assert!(parse_inline_entry("=value").is_err());
        assert!(parse_inline_entry("novalue").is_err());
    }
}
