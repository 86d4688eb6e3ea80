//! Environment-variable configuration with placeholder defaults.
//!
//! Every field falls back to an explicit placeholder string when the
//! corresponding variable is unset, so a misconfigured run fails with a
//! readable value in the logs instead of an empty one.

use serde_json::Value;

use crate::control::Endpoint;

/// `ACTOR_API_HOST`
pub const ACTOR_API_HOST: &str = "ACTOR_API_HOST";
/// `ACTOR_API_PORT`
pub const ACTOR_API_PORT: &str = "ACTOR_API_PORT";
/// `ACTOR_API_DELIVERY_SELECTOR`
pub const ACTOR_API_DELIVERY_SELECTOR: &str = "ACTOR_API_DELIVERY_SELECTOR";
/// `ACTOR_API_SUBSCRIPTION_SELECTOR`
pub const ACTOR_API_SUBSCRIPTION_SELECTOR: &str = "ACTOR_API_SUBSCRIPTION_SELECTOR";
/// `ACTOR_COMMON_NAME`
pub const ACTOR_COMMON_NAME: &str = "ACTOR_COMMON_NAME";
/// `ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM`
pub const ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM: &str = "ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM";
/// `CA_CERTIFICATE_PEM`
pub const CA_CERTIFICATE_PEM: &str = "CA_CERTIFICATE_PEM";
/// `MESSAGE_APPLICATION_PROPERTIES_JSON`
pub const MESSAGE_APPLICATION_PROPERTIES_JSON: &str = "MESSAGE_APPLICATION_PROPERTIES_JSON";
/// `ENDPOINT_HOST`
pub const ENDPOINT_HOST: &str = "ENDPOINT_HOST";
/// `ENDPOINT_PORT`
pub const ENDPOINT_PORT: &str = "ENDPOINT_PORT";
/// `ENDPOINT_TARGET`
pub const ENDPOINT_TARGET: &str = "ENDPOINT_TARGET";
/// `ENDPOINT_SOURCE`
pub const ENDPOINT_SOURCE: &str = "ENDPOINT_SOURCE";

/// Error raised when a configured value cannot be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value that should be a port number is not one.
    #[error("{name} is not a valid port number: '{value}'")]
    InvalidPort {
        /// Name of the offending variable.
        name: &'static str,
        /// The configured value.
        value: String,
    },

    /// The application properties value is not valid JSON.
    #[error("{MESSAGE_APPLICATION_PROPERTIES_JSON} is not valid JSON: {0}")]
    InvalidPropertiesJson(#[from] serde_json::Error),

    /// The application properties value is valid JSON but not an object.
    #[error("{MESSAGE_APPLICATION_PROPERTIES_JSON} must be a JSON object")]
    PropertiesNotAnObject,
}

/// Configuration for all four example flows, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname of the actor API.
    pub api_host: String,
    /// Port of the actor API, as configured.
    pub api_port: String,
    /// Selector submitted when creating a delivery.
    pub delivery_selector: String,
    /// Selector submitted when creating a subscription.
    pub subscription_selector: String,
    /// Common name of the actor, used as the control-plane path segment.
    pub common_name: String,
    /// Path to the PEM bundle with the client certificate chain and key.
    pub certificate_chain_and_key_pem: String,
    /// Path to the CA certificate PEM.
    pub ca_certificate_pem: String,
    /// Static JSON object with the application properties of sent messages.
    pub message_application_properties_json: String,
    /// Pre-known endpoint host for the direct flows.
    pub endpoint_host: String,
    /// Pre-known endpoint port for the direct flows, as configured.
    pub endpoint_port: String,
    /// Pre-known target address for the direct publish flow.
    pub endpoint_target: String,
    /// Pre-known source address for the direct subscribe flow.
    pub endpoint_source: String,
}

impl Config {
    /// Reads the configuration from the environment, substituting the
    /// placeholder default for every unset variable.
    pub fn from_env() -> Self {
        Self {
            api_host: env_or(ACTOR_API_HOST, "hostname_of_the_actor_api"),
            api_port: env_or(ACTOR_API_PORT, "port_of_the_actor_api"),
            delivery_selector: env_or(ACTOR_API_DELIVERY_SELECTOR, "selector_of_the_delivery"),
            subscription_selector: env_or(
                ACTOR_API_SUBSCRIPTION_SELECTOR,
                "selector_of_the_subscription",
            ),
            common_name: env_or(ACTOR_COMMON_NAME, "cn_of_the_actor_client_certificate"),
            certificate_chain_and_key_pem: env_or(
                ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM,
                "pem_with_x509_certificate_chain_and_private_key",
            ),
            ca_certificate_pem: env_or(CA_CERTIFICATE_PEM, "pem_with_x509_certificate"),
            message_application_properties_json: env_or(
                MESSAGE_APPLICATION_PROPERTIES_JSON,
                "message_application_properties_json",
            ),
            endpoint_host: env_or(ENDPOINT_HOST, "amqp_endpoint_host"),
            endpoint_port: env_or(ENDPOINT_PORT, "amqp_endpoint_port"),
            endpoint_target: env_or(ENDPOINT_TARGET, "amqp_endpoint_target_address"),
            endpoint_source: env_or(ENDPOINT_SOURCE, "amqp_endpoint_source_address"),
        }
    }

    /// The actor API port as a number.
    pub fn api_port(&self) -> Result<u16, ConfigError> {
        parse_port(ACTOR_API_PORT, &self.api_port)
    }

    /// The application properties as a JSON object.
    pub fn application_properties(&self) -> Result<serde_json::Map<String, Value>, ConfigError> {
        match serde_json::from_str(&self.message_application_properties_json)? {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::PropertiesNotAnObject),
        }
    }

    /// The pre-known endpoint of the direct publish flow.
    pub fn direct_target_endpoint(&self) -> Result<Endpoint, ConfigError> {
        Ok(Endpoint {
            host: self.endpoint_host.clone(),
            port: parse_port(ENDPOINT_PORT, &self.endpoint_port)?,
            address: self.endpoint_target.clone(),
        })
    }

    /// The pre-known endpoint of the direct subscribe flow.
    pub fn direct_source_endpoint(&self) -> Result<Endpoint, ConfigError> {
        Ok(Endpoint {
            host: self.endpoint_host.clone(),
            port: parse_port(ENDPOINT_PORT, &self.endpoint_port)?,
            address: self.endpoint_source.clone(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_port(name: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidPort {
        name,
        value: value.to_string(),
    })
}
