//! Gateway configuration with layered loading and environment variable interpolation.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file
//! (with `${VAR}` / `${VAR:-fallback}` interpolation), `TOLLGATE_`-prefixed
//! environment variables (nested with `__`), and finally the deployment's
//! plain variable names: `GATEWAY_PORT`, `JWT_SECRET` and `<KEY>_SERVICE_URL`.

use figment::{
    providers::{Env, Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Registered backends, in the order they are probed and reported.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            services: default_services(),
            health: HealthConfig::default(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load, apply environment overrides and validate.
    ///
    /// With no explicit path, `gateway.toml` is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();

        match path {
            Some(path) => figment = figment.merge(InterpolatingToml::file(path)?),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                figment = figment.merge(InterpolatingToml::file(DEFAULT_CONFIG_FILE)?);
            }
            None => {}
        }

        let figment = figment.merge(Env::prefixed("TOLLGATE_").split("__"));

        let mut config = figment.extract::<Self>()?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string. No environment is consulted.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(InterpolatingToml::string(content));
        figment.extract::<Self>().map_err(ConfigError::from)
    }

    /// Apply the deployment's plain environment variables.
    ///
    /// Empty port and URL values count as unset. A blank `JWT_SECRET` is
    /// kept so that validation rejects it.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(port) = non_empty("GATEWAY_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("GATEWAY_PORT is not a port: {port}"))
            })?;
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.secret = Some(SecretString::from(secret));
        }

        for service in &mut self.services {
            if let Some(url) = non_empty(&service.url_env_var()) {
                service.url = url.trim().to_owned();
            }
        }

        Ok(())
    }

    /// Checks that cannot be expressed through serde defaults.
    ///
    /// Service definitions are validated when the registry is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.signing_secret()?;

        if self.auth.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.issuer must not be empty".into()));
        }
        if self.auth.token_ttl.is_zero() {
            return Err(ConfigError::Invalid("auth.token_ttl must be positive".into()));
        }
        if self.health.probe_timeout.is_zero() {
            return Err(ConfigError::Invalid("health.probe_timeout must be positive".into()));
        }
        if self.limits.max_body_size == 0 {
            return Err(ConfigError::Invalid("limits.max_body_size must be positive".into()));
        }

        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Time to wait for in-flight requests during shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub const fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    3001
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// A backend reachable through the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Registry key, e.g. `auth`.
    pub key: String,

    /// Base URL (e.g., `http://127.0.0.1:3002`).
    pub url: String,

    /// Human-readable name shown in status output.
    pub name: String,

    /// Inbound path prefix routed to this service. Defaults to `/api/<key>`.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl ServiceConfig {
    pub fn new(key: impl Into<String>, url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            name: name.into(),
            prefix: None,
        }
    }

    pub fn route_prefix(&self) -> String {
        self.prefix
            .clone()
            .unwrap_or_else(|| format!("/api/{}", self.key))
    }

    /// Environment variable overriding this service's URL, e.g. `AUTH_SERVICE_URL`.
    pub fn url_env_var(&self) -> String {
        format!("{}_SERVICE_URL", self.key.to_ascii_uppercase())
    }
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig::new("auth", "http://localhost:3002", "Authentication Service"),
        ServiceConfig::new("analytics", "http://localhost:3003", "Analytics Service"),
    ]
}

/// Backend health probing.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Upper bound on each individual probe.
    #[serde(
        default = "default_probe_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub probe_timeout: Duration,

    /// Path requested on every backend.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout: default_probe_timeout(),
            probe_path: default_probe_path(),
        }
    }
}

const fn default_probe_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_probe_path() -> String {
    "/health".to_owned()
}

/// Token signing configuration.
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret. Required; there is no fallback.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret: Option<SecretString>,

    /// `iss` claim written into and required of every token.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(
        default = "default_token_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub token_ttl: Duration,
}

impl AuthConfig {
    pub fn signing_secret(&self) -> Result<&SecretString, ConfigError> {
        match &self.secret {
            Some(secret) if !secret.expose_secret().trim().is_empty() => Ok(secret),
            _ => Err(ConfigError::Invalid(
                "signing secret is not set (JWT_SECRET or auth.secret)".into(),
            )),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: default_issuer(),
            token_ttl: default_token_ttl(),
        }
    }
}

fn default_issuer() -> String {
    tollgate_auth::DEFAULT_ISSUER.to_owned()
}

const fn default_token_ttl() -> Duration {
    tollgate_auth::DEFAULT_TOKEN_TTL
}

/// Request and connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Maximum time to wait for a proxied backend response.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,

    /// Maximum time to establish a backend connection.
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

const fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Durations may be given as `"250ms"`, `"5s"`, `"2m"` or a bare number of seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match DurationRepr::deserialize(deserializer)? {
        DurationRepr::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationRepr::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("Invalid duration: {s}");

    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => s.split_at(split),
        None => (s, "s"),
    };
    let value: u64 = number.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Expands `${VAR}` and `${VAR:-fallback}` inside string values.
struct EnvVarInterpolator<F> {
    lookup: F,
}

impl<F> EnvVarInterpolator<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn interpolate_value(&self, value: Value) -> Value {
        match value {
            Value::String(_, s) => Value::from(self.interpolate_string(&s)),
            Value::Dict(tag, dict) => Value::Dict(
                tag,
                dict.into_iter()
                    .map(|(k, v)| (k, self.interpolate_value(v)))
                    .collect(),
            ),
            Value::Array(tag, arr) => Value::Array(
                tag,
                arr.into_iter().map(|v| self.interpolate_value(v)).collect(),
            ),
            other => other,
        }
    }

    fn interpolate_string(&self, s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut rest = s;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                // Unterminated reference is kept literally.
                result.push_str(&rest[start..]);
                return result;
            };

            let reference = &after[..end];
            let (name, fallback) = match reference.split_once(":-") {
                Some((name, fallback)) => (name, Some(fallback)),
                None => (reference, None),
            };

            match (self.lookup)(name) {
                Some(value) => result.push_str(&value),
                None => result.push_str(fallback.unwrap_or_default()),
            }

            rest = &after[end + 1..];
        }

        result.push_str(rest);
        result
    }
}

/// TOML configuration provider with environment variable interpolation.
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        Ok(Self { content })
    }

    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let interpolator = EnvVarInterpolator {
            lookup: |name: &str| std::env::var(name).ok(),
        };

        Ok(Toml::string(&self.content)
            .data()?
            .into_iter()
            .map(|(profile, dict)| {
                let dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, interpolator.interpolate_value(v)))
                    .collect();
                (profile, dict)
            })
            .collect())
    }
}
