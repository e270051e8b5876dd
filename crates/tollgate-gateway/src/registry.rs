//! Static service registry built once from configuration.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::ServiceConfig;
use crate::error::GatewayError;

/// Maximum length for a service key.
pub const MAX_SERVICE_KEY_LENGTH: usize = 64;

static SERVICE_KEY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").ok());

/// A registered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub key: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub display_name: String,
    /// Inbound path prefix stripped before forwarding.
    pub route_prefix: String,
}

impl ServiceDescriptor {
    pub fn new(
        key: impl Into<String>,
        base_url: impl Into<String>,
        display_name: impl Into<String>,
        route_prefix: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            key: key.into(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            display_name: display_name.into(),
            route_prefix: route_prefix.into(),
        }
    }
}

/// Read-only, ordered mapping from service key to descriptor.
///
/// Iteration order is the configured order.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self, GatewayError> {
        Self::new(services.iter().map(|service| {
            ServiceDescriptor::new(
                service.key.clone(),
                service.url.clone(),
                service.name.clone(),
                service.route_prefix(),
            )
        }))
    }

    pub fn new(
        descriptors: impl IntoIterator<Item = ServiceDescriptor>,
    ) -> Result<Self, GatewayError> {
        let mut services = Vec::new();
        let mut index = HashMap::new();

        for descriptor in descriptors {
            validate_service_key(&descriptor.key)?;
            validate_base_url(&descriptor)?;
            validate_route_prefix(&descriptor)?;

            if index.contains_key(&descriptor.key) {
                return Err(GatewayError::Config(format!(
                    "duplicate service key '{}'",
                    descriptor.key
                )));
            }
            if let Some(existing) = services
                .iter()
                .find(|s: &&ServiceDescriptor| s.route_prefix == descriptor.route_prefix)
            {
                return Err(GatewayError::Config(format!(
                    "services '{}' and '{}' share route prefix {}",
                    existing.key, descriptor.key, descriptor.route_prefix
                )));
            }

            index.insert(descriptor.key.clone(), services.len());
            services.push(descriptor);
        }

        Ok(Self { services, index })
    }

    /// Look up a service by key.
    pub fn resolve(&self, key: &str) -> Result<&ServiceDescriptor, GatewayError> {
        self.index
            .get(key)
            .map(|&position| &self.services[position])
            .ok_or_else(|| GatewayError::ServiceNotFound(key.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.services.iter().map(|s| s.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Validate a service key.
pub fn validate_service_key(key: &str) -> Result<(), GatewayError> {
    if key.is_empty() {
        return Err(GatewayError::Config("service key cannot be empty".into()));
    }

    if key.len() > MAX_SERVICE_KEY_LENGTH {
        return Err(GatewayError::Config(format!(
            "service key exceeds maximum length of {MAX_SERVICE_KEY_LENGTH} characters"
        )));
    }

    let Some(pattern) = SERVICE_KEY_PATTERN.as_ref() else {
        return Err(GatewayError::Config("service key validation unavailable".into()));
    };

    if !pattern.is_match(key) {
        return Err(GatewayError::Config(format!(
            "service key '{key}' must start with a lowercase letter and contain only lowercase letters, digits, and underscores"
        )));
    }

    Ok(())
}

fn validate_base_url(descriptor: &ServiceDescriptor) -> Result<(), GatewayError> {
    let uri: http::Uri = descriptor.base_url.parse().map_err(|e| {
        GatewayError::Config(format!(
            "service '{}' has an invalid URL {}: {e}",
            descriptor.key, descriptor.base_url
        ))
    })?;

    if uri.scheme_str() != Some("http") {
        return Err(GatewayError::Config(format!(
            "service '{}' URL must use http://",
            descriptor.key
        )));
    }
    if uri.host().map_or(true, str::is_empty) {
        return Err(GatewayError::Config(format!(
            "service '{}' URL is missing a host",
            descriptor.key
        )));
    }

    Ok(())
}

fn validate_route_prefix(descriptor: &ServiceDescriptor) -> Result<(), GatewayError> {
    let prefix = &descriptor.route_prefix;
    if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
        return Err(GatewayError::Config(format!(
            "service '{}' route prefix {prefix} must start with '/' and not end with '/'",
            descriptor.key
        )));
    }
    if prefix.contains(['{', '}', '*']) {
        return Err(GatewayError::Config(format!(
            "service '{}' route prefix {prefix} contains a pattern character",
            descriptor.key
        )));
    }
    Ok(())
}
