//! Publish into a pre-known delivery endpoint until interrupted.

use actor_amqp_client::{run, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn dump_config(config: &Config) {
    info!(
        "ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM: '{}'",
        config.certificate_chain_and_key_pem
    );
    info!("CA_CERTIFICATE_PEM: '{}'", config.ca_certificate_pem);
    info!(
        "MESSAGE_APPLICATION_PROPERTIES_JSON: '{}'",
        config.message_application_properties_json
    );
    info!("ENDPOINT_HOST: '{}'", config.endpoint_host);
    info!("ENDPOINT_PORT: '{}'", config.endpoint_port);
    info!("ENDPOINT_TARGET: '{}'", config.endpoint_target);
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting application");
    let config = Config::from_env();
    dump_config(&config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });

    match run::direct_publish(&config, cancel).await {
        Ok(sent) => info!("Stopped after sending {} messages", sent),
        Err(err) => error!("An error occurred while running direct_publish: {}", err),
    }

    info!("Application stopped");
}
