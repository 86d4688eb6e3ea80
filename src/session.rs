//! AMQP session driver: connect to a resolved endpoint and run a single
//! sender or receiver link until cancelled.
//!
//! The connection stack is layered by hand the way the actor platform
//! expects it: TCP, then TLS against the pinned CA, then SASL EXTERNAL with
//! the certificate-derived identity, then the AMQP connection opened on the
//! finished stream. One connection carries one session carrying one link;
//! the loop that created them releases them link first, connection last, on
//! every exit path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use fe2o3_amqp::connection::{ConnectionHandle, OpenError};
use fe2o3_amqp::link::{
    DetachError, DispositionError, ReceiverAttachError, RecvError, SendError, SenderAttachError,
};
use fe2o3_amqp::session::{BeginError, SessionHandle};
use fe2o3_amqp::types::messaging::{ApplicationProperties, Body, Message};
use fe2o3_amqp::types::primitives::{Binary, Value};
use fe2o3_amqp::{Connection, Receiver, Sender, Session};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::Endpoint;
use crate::identity::Credentials;
use crate::message::{render_application_properties, render_body};
use crate::sasl::{self, NegotiationError};

/// Fixed pause between two published messages.
pub const SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded wait for a single receive attempt before the cancellation token
/// is consulted again.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

const SENDER_LINK_NAME: &str = "sender-link";
const RECEIVER_LINK_NAME: &str = "receiver-link";

/// Error raised while connecting or driving a link.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// TCP connect or TLS handshake failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The endpoint host is not usable as a TLS server name.
    #[error("endpoint host is not a valid server name: {0}")]
    InvalidServerName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// SASL EXTERNAL negotiation failed.
    #[error(transparent)]
    Sasl(#[from] NegotiationError),

    /// The AMQP connection could not be opened.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// The session could not be started.
    #[error(transparent)]
    Begin(#[from] BeginError),

    /// The sender link could not be attached.
    #[error(transparent)]
    SenderAttach(#[from] SenderAttachError),

    /// The receiver link could not be attached.
    #[error(transparent)]
    ReceiverAttach(#[from] ReceiverAttachError),

    /// Sending a message failed.
    #[error(transparent)]
    Send(#[from] SendError),

    /// The peer settled a message with a non-accepted outcome.
    #[error("message was not accepted: {0}")]
    NotAccepted(String),

    /// Receiving a message failed.
    #[error(transparent)]
    Recv(#[from] RecvError),

    /// Accepting a received message failed.
    #[error(transparent)]
    Disposition(#[from] DispositionError),

    /// Closing a link failed.
    #[error(transparent)]
    Detach(#[from] DetachError),

    /// Ending the session failed.
    #[error(transparent)]
    SessionEnd(#[from] fe2o3_amqp::session::Error),

    /// Closing the connection failed.
    #[error(transparent)]
    ConnectionClose(#[from] fe2o3_amqp::connection::Error),
}

/// Drives one sender or receiver link against a resolved endpoint.
#[derive(Debug, Clone)]
pub struct SessionDriver {
    tls: Arc<rustls::ClientConfig>,
    identity: String,
    container_id: String,
}

impl SessionDriver {
    /// Creates a driver using the actor's TLS configuration and the identity
    /// derived from its certificate.
    pub fn new(
        credentials: &Credentials,
        tls: rustls::ClientConfig,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            tls: Arc::new(tls),
            identity: credentials.common_name().to_string(),
            container_id: container_id.into(),
        }
    }

    /// Opens the AMQP connection: TCP, TLS, SASL EXTERNAL, AMQP open.
    async fn connect(&self, endpoint: &Endpoint) -> Result<ConnectionHandle<()>, DriverError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        let domain = ServerName::try_from(endpoint.host.clone())?;
        let connector = TlsConnector::from(self.tls.clone());
        let mut tls_stream = connector.connect(domain, stream).await?;

        sasl::negotiate_external(&mut tls_stream, Some(&endpoint.host), &self.identity).await?;

        let connection = Connection::builder()
            .container_id(self.container_id.clone())
            .hostname(endpoint.host.as_str())
            .open_with_stream(tls_stream)
            .await?;
        info!(%endpoint, "AMQP connection opened");
        Ok(connection)
    }

    /// Publishes counter-and-timestamp messages on the endpoint target until
    /// cancelled, one per [`SEND_INTERVAL`]. Returns the number of messages
    /// sent.
    pub async fn publish(
        &self,
        endpoint: &Endpoint,
        properties: &ApplicationProperties,
        cancel: CancellationToken,
    ) -> Result<u64, DriverError> {
        let mut connection = self.connect(endpoint).await?;
        let mut session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(err) => return Err(abort_connection(connection, err.into()).await),
        };
        let mut sender =
            match Sender::attach(&mut session, SENDER_LINK_NAME, &endpoint.address).await {
                Ok(sender) => sender,
                Err(err) => return Err(abort_session(session, connection, err.into()).await),
            };
        info!(address = %endpoint.address, "sender link attached");

        let mut sent = 0u64;
        let loop_result = send_until_cancelled(&mut sender, properties, &cancel, &mut sent).await;

        finish(sender.close().await, session, connection, loop_result).await?;
        Ok(sent)
    }

    /// Receives and accepts messages from the endpoint source until
    /// cancelled, re-checking the token every [`RECV_TIMEOUT`]. Returns the
    /// number of messages received.
    pub async fn listen(
        &self,
        endpoint: &Endpoint,
        cancel: CancellationToken,
    ) -> Result<u64, DriverError> {
        let mut connection = self.connect(endpoint).await?;
        let mut session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(err) => return Err(abort_connection(connection, err.into()).await),
        };
        let mut receiver =
            match Receiver::attach(&mut session, RECEIVER_LINK_NAME, &endpoint.address).await {
                Ok(receiver) => receiver,
                Err(err) => return Err(abort_session(session, connection, err.into()).await),
            };
        info!(address = %endpoint.address, "receiver link attached");

        let mut received = 0u64;
        let loop_result = receive_until_cancelled(&mut receiver, &cancel, &mut received).await;

        finish(receiver.close().await, session, connection, loop_result).await?;
        Ok(received)
    }
}

async fn send_until_cancelled(
    sender: &mut Sender,
    properties: &ApplicationProperties,
    cancel: &CancellationToken,
    sent: &mut u64,
) -> Result<(), DriverError> {
    let rendered_properties = render_application_properties(Some(properties));
    loop {
        let count = *sent + 1;
        let body_text = format!(
            "Hello World! Message #{} at {}",
            count,
            Local::now().format("%H:%M:%S")
        );
        let message = Message::builder()
            .application_properties(properties.clone())
            .data(Binary::from(body_text.clone().into_bytes()))
            .build();

        info!(
            "Sending message: body='{}', properties={}",
            body_text, rendered_properties
        );
        let outcome = sender.send(message).await?;
        if let Err(outcome) = outcome.accepted_or_else(|outcome| outcome) {
            return Err(DriverError::NotAccepted(format!("{:?}", outcome)));
        }
        *sent = count;

        if !wait_or_cancelled(cancel, SEND_INTERVAL).await {
            return Ok(());
        }
    }
}

async fn receive_until_cancelled(
    receiver: &mut Receiver,
    cancel: &CancellationToken,
    received: &mut u64,
) -> Result<(), DriverError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            attempt = tokio::time::timeout(RECV_TIMEOUT, receiver.recv::<Body<Value>>()) => {
                let delivery = match attempt {
                    // nothing arrived within the bounded wait; go around and
                    // look at the cancellation token again
                    Err(_elapsed) => continue,
                    Ok(Err(err)) => return Err(err.into()),
                    Ok(Ok(delivery)) => delivery,
                };
                let message = delivery.message();
                info!(
                    "Message received: body='{}', properties={}",
                    render_body(&message.body),
                    render_application_properties(message.application_properties.as_ref())
                );
                receiver.accept(&delivery).await?;
                *received += 1;
            }
        }
    }
}

/// Waits one interval between loop iterations. Returns `false` as soon as
/// the token is cancelled, without finishing the interval.
async fn wait_or_cancelled(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

/// Completes the link → session → connection release that started with the
/// already-awaited link close. When the loop itself failed, release errors
/// are only logged so the loop error stays the primary one.
async fn finish(
    detach: Result<(), DetachError>,
    mut session: SessionHandle<()>,
    mut connection: ConnectionHandle<()>,
    loop_result: Result<(), DriverError>,
) -> Result<(), DriverError> {
    let end = session.end().await;
    let close = connection.close().await;
    match loop_result {
        Ok(()) => {
            detach?;
            end?;
            close?;
            Ok(())
        }
        Err(err) => {
            if let Err(detach_err) = detach {
                warn!(error = %detach_err, "link close failed during shutdown");
            }
            if let Err(end_err) = end {
                warn!(error = %end_err, "session end failed during shutdown");
            }
            if let Err(close_err) = close {
                warn!(error = %close_err, "connection close failed during shutdown");
            }
            Err(err)
        }
    }
}

async fn abort_session(
    mut session: SessionHandle<()>,
    connection: ConnectionHandle<()>,
    err: DriverError,
) -> DriverError {
    if let Err(end_err) = session.end().await {
        debug!(error = %end_err, "session end failed during abort");
    }
    abort_connection(connection, err).await
}

async fn abort_connection(mut connection: ConnectionHandle<()>, err: DriverError) -> DriverError {
    if let Err(close_err) = connection.close().await {
        debug!(error = %close_err, "connection close failed during abort");
    }
    err
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_finishes_the_interval_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        assert!(wait_or_cancelled(&cancel, SEND_INTERVAL).await);
        assert_eq!(started.elapsed(), SEND_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_breaks_the_wait_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(!wait_or_cancelled(&cancel, SEND_INTERVAL).await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_interval_breaks_within_the_interval() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        assert!(!wait_or_cancelled(&cancel, SEND_INTERVAL).await);
        assert!(started.elapsed() < SEND_INTERVAL);
    }
}
