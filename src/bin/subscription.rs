//! Create a subscription via the actor API, then receive from its endpoint
//! until interrupted.

use actor_amqp_client::{run, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn dump_config(config: &Config) {
    info!("ACTOR_API_HOST: '{}'", config.api_host);
    info!("ACTOR_API_PORT: '{}'", config.api_port);
    info!(
        "ACTOR_API_SUBSCRIPTION_SELECTOR: '{}'",
        config.subscription_selector
    );
    info!("ACTOR_COMMON_NAME: '{}'", config.common_name);
    info!(
        "ACTOR_CERTIFICATE_CHAIN_AND_KEY_PEM: '{}'",
        config.certificate_chain_and_key_pem
    );
    info!("CA_CERTIFICATE_PEM: '{}'", config.ca_certificate_pem);
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

    match run::subscribe_and_receive(&config, cancel).await {
        Ok(received) => info!("Stopped after receiving {} messages", received),
        Err(err) => error!(
            "An error occurred while running subscribe_and_receive: {}",
            err
        ),
    }

    info!("Application stopped");
}
