//! Create a delivery via the actor API, then publish into its endpoint
//! until interrupted.

use actor_amqp_client::{run, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn dump_config(config: &Config) {
    info!("ACTOR_API_HOST: '{}'", config.api_host);
    info!("ACTOR_API_PORT: '{}'", config.api_port);
    info!("ACTOR_API_DELIVERY_SELECTOR: '{}'", config.delivery_selector);
    info!("ACTOR_COMMON_NAME: '{}'", config.common_name);
    info!(
        "ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM: '{}'",
        config.certificate_chain_and_key_pem
    );
    info!("CA_CERTIFICATE_PEM: '{}'", config.ca_certificate_pem);
    info!(
        "MESSAGE_APPLICATION_PROPERTIES_JSON: '{}'",
        config.message_application_properties_json
    );
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

    match run::create_and_publish(&config, cancel).await {
        Ok(sent) => info!("Stopped after sending {} messages", sent),
        Err(err) => error!("An error occurred while running create_and_publish: {}", err),
    }

    info!("Application stopped");
}
