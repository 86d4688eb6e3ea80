//! The four example flows, one per shipped binary.
//!
//! Each flow loads the credentials, builds the shared TLS configuration,
//! resolves an endpoint (from the control plane or straight from
//! configuration) and hands it to the session driver. Errors are returned
//! to the binary, which logs a single summary line; cancellation is not an
//! error and yields the number of messages exchanged.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::control::{ControlPlaneClient, Endpoint, Resource};
use crate::identity::Credentials;
use crate::message::application_properties_from_json;
use crate::session::SessionDriver;
use crate::{tls, Result};

/// Creates a delivery, waits for it to settle and publishes into it until
/// cancelled. Returns the number of messages sent.
pub async fn create_and_publish(config: &Config, cancel: CancellationToken) -> Result<u64> {
    let (credentials, tls_config) = load_credentials(config)?;
    let client = ControlPlaneClient::new(
        &config.api_host,
        config.api_port()?,
        &config.common_name,
        tls_config.clone(),
    )?;
    let endpoint = client
        .resolve_endpoint(Resource::Deliveries, &config.delivery_selector)
        .await?;
    info!(%endpoint, "Using endpoint");

    publish(config, credentials, tls_config, &endpoint, "delivery-example", cancel).await
}

/// Publishes into a pre-known endpoint until cancelled.
pub async fn direct_publish(config: &Config, cancel: CancellationToken) -> Result<u64> {
    let (credentials, tls_config) = load_credentials(config)?;
    let endpoint = config.direct_target_endpoint()?;
    info!(%endpoint, "Using pre-known endpoint");

    publish(
        config,
        credentials,
        tls_config,
        &endpoint,
        "delivery-direct-example",
        cancel,
    )
    .await
}

/// Creates a subscription, waits for it to settle and consumes it until
/// cancelled. Returns the number of messages received.
pub async fn subscribe_and_receive(config: &Config, cancel: CancellationToken) -> Result<u64> {
    let (credentials, tls_config) = load_credentials(config)?;
    let client = ControlPlaneClient::new(
        &config.api_host,
        config.api_port()?,
        &config.common_name,
        tls_config.clone(),
    )?;
    let endpoint = client
        .resolve_endpoint(Resource::Subscriptions, &config.subscription_selector)
        .await?;
    info!(%endpoint, "Using endpoint");

    let driver = SessionDriver::new(&credentials, tls_config, "subscription-example");
    Ok(driver.listen(&endpoint, cancel).await?)
}

/// Consumes a pre-known endpoint until cancelled.
pub async fn direct_subscribe(config: &Config, cancel: CancellationToken) -> Result<u64> {
    let (credentials, tls_config) = load_credentials(config)?;
    let endpoint = config.direct_source_endpoint()?;
    info!(%endpoint, "Using pre-known endpoint");

    let driver = SessionDriver::new(&credentials, tls_config, "subscription-direct-example");
    Ok(driver.listen(&endpoint, cancel).await?)
}

fn load_credentials(config: &Config) -> Result<(Credentials, rustls::ClientConfig)> {
    let credentials = Credentials::load(
        &config.certificate_chain_and_key_pem,
        &config.ca_certificate_pem,
    )?;
    let tls_config = tls::client_config(&credentials)?;
    Ok((credentials, tls_config))
}

async fn publish(
    config: &Config,
    credentials: Credentials,
    tls_config: rustls::ClientConfig,
    endpoint: &Endpoint,
    container_id: &str,
    cancel: CancellationToken,
) -> Result<u64> {
    let properties = application_properties_from_json(&config.application_properties()?)?;
    let driver = SessionDriver::new(&credentials, tls_config, container_id);
    Ok(driver.publish(endpoint, &properties, cancel).await?)
}
