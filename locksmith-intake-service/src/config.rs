use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_CATALOG_PATH: &str = "data/providers.yaml";
const DEFAULT_HINT_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_HINT_TIMEOUT_MS: u64 = 4000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Twilio credentials are incomplete, {0} is not set")]
    IncompleteTwilio(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured logging for production
    #[default]
    Json,
    /// Human-readable logging for development
    Pretty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender address, e.g. `whatsapp:+14155238886`
    pub whatsapp_from: String,
}

/// Service settings, read once from the environment at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    pub provider_catalog_path: PathBuf,
    /// Without credentials replies are only logged
    pub twilio: Option<TwilioConfig>,
    pub human_whatsapp_to: Option<String>,
    /// Without a key hint extraction is disabled
    pub openrouter_api_key: Option<String>,
    pub hint_model: String,
    pub hint_timeout: Duration,
    /// Unset means sessions are never evicted
    pub session_idle_ttl: Option<Duration>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind_addr.clone(),
            reason: e.to_string(),
        })?;

        let log_format = match var("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let twilio = match (
            var("TWILIO_ACCOUNT_SID"),
            var("TWILIO_AUTH_TOKEN"),
            var("TWILIO_WHATSAPP_FROM"),
        ) {
            (None, None, None) => None,
            (Some(account_sid), Some(auth_token), Some(whatsapp_from)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                whatsapp_from,
            }),
            (None, _, _) => return Err(ConfigError::IncompleteTwilio("TWILIO_ACCOUNT_SID")),
            (_, None, _) => return Err(ConfigError::IncompleteTwilio("TWILIO_AUTH_TOKEN")),
            (_, _, None) => return Err(ConfigError::IncompleteTwilio("TWILIO_WHATSAPP_FROM")),
        };

        let hint_timeout_ms = parse_u64(&var, "HINT_TIMEOUT_MS")?.unwrap_or(DEFAULT_HINT_TIMEOUT_MS);
        let session_idle_ttl = parse_u64(&var, "SESSION_IDLE_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            bind_addr,
            log_format,
            provider_catalog_path: var("PROVIDER_CATALOG_PATH")
                .unwrap_or_else(|| DEFAULT_CATALOG_PATH.to_string())
                .into(),
            twilio,
            human_whatsapp_to: var("HUMAN_WHATSAPP_TO"),
            openrouter_api_key: var("OPENROUTER_API_KEY"),
            hint_model: var("HINT_MODEL").unwrap_or_else(|| DEFAULT_HINT_MODEL.to_string()),
            hint_timeout: Duration::from_millis(hint_timeout_ms),
            session_idle_ttl,
        })
    }
}

fn parse_u64(var: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<u64>, ConfigError> {
    var(name)
        .map(|value| {
            value.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
