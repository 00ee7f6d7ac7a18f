use std::net::SocketAddr;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub instance_id: String,
    pub role: Role,
    pub broker_backend: BrokerBackend,
    pub amqp_url: String,
    pub names: BrokerNames,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

/// Broker entity names, threaded through to the provisioner and publishers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerNames {
    pub parameter_queue: String,
    pub trigger_exchange: String,
    /// Queue bound to the trigger exchange by this process; `None` leaves
    /// binding to the consumers.
    pub trigger_queue: Option<String>,
}

impl Default for BrokerNames {
    fn default() -> Self {
        Self {
            parameter_queue: "userParams".into(),
            trigger_exchange: "runTriggerFanoutExchange".into(),
            trigger_queue: Some("runTrigger".into()),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parsed(&lookup, "DIET_DISPATCH_ADDR", "0.0.0.0:8080")?;
        let log_filter = lookup("RUST_LOG").unwrap_or_else(|| "info,diet_dispatch=debug".into());
        let log_format = LogFormat::parse(lookup("DIET_LOG_FORMAT").as_deref())?;
        let instance_id =
            lookup("DIET_DISPATCH_INSTANCE_ID").unwrap_or_else(|| "diet-dispatch-1".into());
        let role = Role::parse(lookup("DIET_DISPATCH_ROLE").as_deref())?;
        let broker_backend = BrokerBackend::parse(lookup("DIET_BROKER_BACKEND").as_deref())?;
        let amqp_url = match lookup("AMQP_URL") {
            Some(url) => url,
            None => compose_amqp_url(&lookup)?,
        };

        let defaults = BrokerNames::default();
        let names = BrokerNames {
            parameter_queue: lookup("DIET_PARAMETER_QUEUE").unwrap_or(defaults.parameter_queue),
            trigger_exchange: lookup("DIET_TRIGGER_EXCHANGE").unwrap_or(defaults.trigger_exchange),
            trigger_queue: match lookup("DIET_TRIGGER_QUEUE") {
                Some(queue) if queue.trim().is_empty() => None,
                Some(queue) => Some(queue),
                None => defaults.trigger_queue,
            },
        };

        let connect_timeout =
            Duration::from_millis(parsed(&lookup, "DIET_BROKER_CONNECT_TIMEOUT_MS", "5000")?);
        let publish_timeout =
            Duration::from_millis(parsed(&lookup, "DIET_BROKER_PUBLISH_TIMEOUT_MS", "5000")?);

        Ok(Self {
            bind_addr,
            log_filter,
            log_format,
            instance_id,
            role,
            broker_backend,
            amqp_url,
            names,
            connect_timeout,
            publish_timeout,
        })
    }

    /// The AMQP URL with any password replaced, for logging.
    pub fn redacted_amqp_url(&self) -> String {
        redact_password(&self.amqp_url)
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).unwrap_or_else(|| default.to_string());
    value.parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
        value,
    })
}

fn compose_amqp_url<F>(lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("RABBITMQ_HOST").unwrap_or_else(|| "localhost".into());
    let port: u16 = parsed(lookup, "RABBITMQ_PORT", "5672")?;
    let user = lookup("RABBITMQ_USERNAME").unwrap_or_else(|| "guest".into());
    let password = lookup("RABBITMQ_PASSWORD").unwrap_or_else(|| "guest".into());
    let vhost = lookup("RABBITMQ_VHOST").unwrap_or_else(|| "/".into());
    Ok(format!(
        "amqp://{}:{}@{host}:{port}/{}",
        percent_encode(&user),
        percent_encode(&password),
        percent_encode(&vhost)
    ))
}

/// Userinfo and vhost segments keep only RFC 3986 unreserved characters.
const AMQP_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn percent_encode(raw: &str) -> String {
    utf8_percent_encode(raw, AMQP_SEGMENT).to_string()
}

fn redact_password(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "<unparseable amqp url>".to_string();
    };
    if url.password().is_some() && url.set_password(Some("***")).is_err() {
        return "<unparseable amqp url>".to_string();
    }
    url.to_string()
}

/// Which half of the coordination layer this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Parameters,
    Crawl,
    All,
}

impl Role {
    fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw.unwrap_or("all") {
            "parameters" | "params" => Ok(Role::Parameters),
            "crawl" => Ok(Role::Crawl),
            "all" => Ok(Role::All),
            other => Err(ConfigError::Invalid {
                key: "DIET_DISPATCH_ROLE",
                value: other.to_string(),
                reason: "expected parameters, crawl or all".into(),
            }),
        }
    }

    pub fn publishes_parameters(&self) -> bool {
        matches!(self, Role::Parameters | Role::All)
    }

    pub fn publishes_triggers(&self) -> bool {
        matches!(self, Role::Crawl | Role::All)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Parameters => "parameters",
            Role::Crawl => "crawl",
            Role::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Amqp,
    InMemory,
}

impl BrokerBackend {
    fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw.unwrap_or("amqp") {
            "amqp" | "rabbitmq" => Ok(BrokerBackend::Amqp),
            "memory" => Ok(BrokerBackend::InMemory),
            other => Err(ConfigError::Invalid {
                key: "DIET_BROKER_BACKEND",
                value: other.to_string(),
                reason: "expected amqp or memory".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw.unwrap_or("text") {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid {
                key: "DIET_LOG_FORMAT",
                value: other.to_string(),
                reason: "expected text or json".into(),
            }),
        }
    }
}
