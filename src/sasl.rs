//! SASL EXTERNAL negotiation on an established TLS stream.
//!
//! `fe2o3-amqp` ships ANONYMOUS and PLAIN profiles; the actor platform
//! instead authenticates the AMQP layer with SASL EXTERNAL, where the
//! initial response carries the identity already proven by the client
//! certificate beneath. The exchange is fixed and small (header, server
//! mechanisms, init, outcome), so this module drives it directly on the
//! stream and then hands the stream over to
//! [`fe2o3_amqp::Connection`](fe2o3_amqp::Connection) for the AMQP
//! protocol-header exchange and everything above it.
//!
//! Frames are read with exact-length reads, which guarantees no bytes past
//! the outcome frame are consumed before the library takes the stream.

use fe2o3_amqp_types::primitives::{Binary, Symbol};
use fe2o3_amqp_types::sasl::{SaslCode, SaslInit, SaslMechanisms, SaslOutcome};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// SASL protocol header: `AMQP`, protocol id 0x03, version 1.0.0.
pub const SASL_PROTO_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0x03, 0x01, 0x00, 0x00];

/// The SASL mechanism this crate speaks.
pub const EXTERNAL: &str = "EXTERNAL";

const FRAME_TYPE_SASL: u8 = 0x01;

// Prior to any explicit negotiation the maximum frame size is 512
// (MIN-MAX-FRAME-SIZE), which is all a SASL exchange may use.
const MAX_SASL_FRAME_SIZE: usize = 512;

/// Error raised during SASL negotiation.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The stream failed underneath the exchange.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The peer answered the SASL header with something else.
    #[error("protocol header mismatch: {0:?}")]
    ProtocolHeaderMismatch([u8; 8]),

    /// A frame violated the SASL framing rules.
    #[error("malformed SASL frame: {0}")]
    MalformedFrame(&'static str),

    /// A frame body failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] serde_amqp::Error),

    /// The server does not offer EXTERNAL.
    #[error("SASL mechanism EXTERNAL is not offered by the peer")]
    MechanismNotSupported,

    /// The server sent a challenge, which EXTERNAL never uses.
    #[error("unexpected SASL challenge during EXTERNAL negotiation")]
    UnexpectedChallenge,

    /// The server rejected the negotiation.
    #[error("SASL negotiation rejected with code {code:?}")]
    Rejected {
        /// Outcome code reported by the server.
        code: SaslCode,
    },
}

/// SASL EXTERNAL as a fixed-capability profile: one mechanism name, an
/// initial response carrying the identity bytes, no challenge handling and
/// no transport upgrade.
#[derive(Debug, Clone)]
pub struct ExternalProfile {
    identity: String,
}

impl ExternalProfile {
    /// Creates a profile presenting `identity` as the sole credential.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    /// The mechanism name sent in `sasl-init`.
    pub fn mechanism(&self) -> Symbol {
        Symbol::from(EXTERNAL)
    }

    /// The initial response: the UTF-8 bytes of the identity.
    pub fn initial_response(&self) -> Option<Binary> {
        Some(Binary::from(self.identity.as_bytes().to_vec()))
    }

    /// Answers the server `sasl-mechanisms` frame with a `sasl-init`, or
    /// fails if EXTERNAL is not offered.
    pub fn on_mechanisms(
        &self,
        mechanisms: &SaslMechanisms,
        hostname: Option<&str>,
    ) -> Result<SaslInit, NegotiationError> {
        let mechanism = self.mechanism();
        if !mechanisms.sasl_server_mechanisms.0.contains(&mechanism) {
            return Err(NegotiationError::MechanismNotSupported);
        }
        Ok(SaslInit {
            mechanism,
            initial_response: self.initial_response(),
            hostname: hostname.map(Into::into),
        })
    }

    /// Checks the `sasl-outcome` frame for success.
    pub fn on_outcome(&self, outcome: &SaslOutcome) -> Result<(), NegotiationError> {
        match outcome.code {
            SaslCode::Ok => Ok(()),
            ref code => Err(NegotiationError::Rejected { code: code.clone() }),
        }
    }
}

/// Negotiates SASL EXTERNAL on `stream`, presenting `identity`.
///
/// On return the stream is positioned right after the `sasl-outcome` frame,
/// ready for the AMQP protocol-header exchange performed by
/// `Connection::builder().open_with_stream(..)`.
pub async fn negotiate_external<Io>(
    stream: &mut Io,
    hostname: Option<&str>,
    identity: &str,
) -> Result<(), NegotiationError>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let profile = ExternalProfile::new(identity);

    stream.write_all(&SASL_PROTO_HEADER).await?;
    stream.flush().await?;
    let mut incoming = [0u8; 8];
    stream.read_exact(&mut incoming).await?;
    if incoming != SASL_PROTO_HEADER {
        return Err(NegotiationError::ProtocolHeaderMismatch(incoming));
    }
    trace!("SASL protocol header exchanged");

    let mechanisms: SaslMechanisms = serde_amqp::from_slice(&read_frame(stream).await?)?;
    trace!(?mechanisms, "received sasl-mechanisms");

    let init = profile.on_mechanisms(&mechanisms, hostname)?;
    write_frame(stream, &serde_amqp::to_vec(&init)?).await?;

    let body = read_frame(stream).await?;
    let outcome: SaslOutcome = match serde_amqp::from_slice(&body) {
        Ok(outcome) => outcome,
        // EXTERNAL is a single-exchange mechanism; the only other frame a
        // server may legally send here is a challenge.
        Err(err) => match serde_amqp::from_slice::<fe2o3_amqp_types::sasl::SaslChallenge>(&body) {
            Ok(_) => return Err(NegotiationError::UnexpectedChallenge),
            Err(_) => return Err(NegotiationError::Codec(err)),
        },
    };
    profile.on_outcome(&outcome)?;
    debug!(identity, "SASL EXTERNAL negotiation complete");
    Ok(())
}

/// Prepends the frame header (size, DOFF 2, type 0x01) and writes the frame.
async fn write_frame<Io>(stream: &mut Io, body: &[u8]) -> Result<(), NegotiationError>
where
    Io: AsyncWrite + Unpin,
{
    let size = body.len() + 8;
    if size > MAX_SASL_FRAME_SIZE {
        return Err(NegotiationError::MalformedFrame("frame exceeds 512 bytes"));
    }
    let mut frame = Vec::with_capacity(size);
    frame.extend_from_slice(&(size as u32).to_be_bytes());
    frame.push(0x02); // DOFF: no extended header
    frame.push(FRAME_TYPE_SASL);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(body);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads exactly one SASL frame and returns its body bytes.
async fn read_frame<Io>(stream: &mut Io) -> Result<Vec<u8>, NegotiationError>
where
    Io: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await?;
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if !(8..=MAX_SASL_FRAME_SIZE).contains(&size) {
        return Err(NegotiationError::MalformedFrame("invalid frame size"));
    }
    if header[4] != 0x02 {
        return Err(NegotiationError::MalformedFrame("unexpected DOFF"));
    }
    if header[5] != FRAME_TYPE_SASL {
        return Err(NegotiationError::MalformedFrame("not a SASL frame"));
    }
    let mut body = vec![0u8; size - 8];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use fe2o3_amqp_types::sasl::SaslChallenge;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    fn mechanisms(names: &[&str]) -> SaslMechanisms {
        SaslMechanisms {
            sasl_server_mechanisms: names
                .iter()
                .map(|name| Symbol::from(*name))
                .collect::<Vec<_>>()
                .into(),
        }
    }

    #[test]
    fn init_carries_identity_bytes() {
        let profile = ExternalProfile::new("XX12345");
        let init = profile
            .on_mechanisms(&mechanisms(&["PLAIN", "EXTERNAL"]), Some("broker"))
            .unwrap();
        assert_eq!(init.mechanism, Symbol::from("EXTERNAL"));
        assert_eq!(
            init.initial_response.as_deref().map(|b| &b[..]),
            Some(b"XX12345".as_slice())
        );
        assert_eq!(init.hostname.as_deref(), Some("broker"));
    }

    #[test]
    fn external_must_be_offered() {
        let profile = ExternalProfile::new("XX12345");
        let result = profile.on_mechanisms(&mechanisms(&["PLAIN", "ANONYMOUS"]), None);
        assert!(matches!(
            result,
            Err(NegotiationError::MechanismNotSupported)
        ));
    }

    #[test]
    fn non_zero_outcome_is_rejected() {
        let profile = ExternalProfile::new("XX12345");
        let outcome = SaslOutcome {
            code: SaslCode::Auth,
            additional_data: None,
        };
        assert!(matches!(
            profile.on_outcome(&outcome),
            Err(NegotiationError::Rejected {
                code: SaslCode::Auth
            })
        ));
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = duplex(1024);
        let body = serde_amqp::to_vec(&mechanisms(&["EXTERNAL"])).unwrap();
        write_frame(&mut client, &body).await.unwrap();

        let read = read_frame(&mut server).await.unwrap();
        assert_eq!(read, body);
        let decoded: SaslMechanisms = serde_amqp::from_slice(&read).unwrap();
        assert_eq!(
            decoded.sasl_server_mechanisms.0,
            vec![Symbol::from("EXTERNAL")]
        );
    }

    async fn server_header_exchange(server: &mut DuplexStream) {
        let mut header = [0u8; 8];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(header, SASL_PROTO_HEADER);
        server.write_all(&SASL_PROTO_HEADER).await.unwrap();
    }

    async fn server_read_init(server: &mut DuplexStream) -> SaslInit {
        let body = read_frame(server).await.unwrap();
        serde_amqp::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn negotiates_external_end_to_end() {
        let (mut client, mut server) = duplex(1024);

        let peer = tokio::spawn(async move {
            server_header_exchange(&mut server).await;

            let body = serde_amqp::to_vec(&mechanisms(&["EXTERNAL", "PLAIN"])).unwrap();
            write_frame(&mut server, &body).await.unwrap();

            let init = server_read_init(&mut server).await;
            assert_eq!(init.mechanism, Symbol::from("EXTERNAL"));
            assert_eq!(
                init.initial_response.as_deref().map(|b| &b[..]),
                Some(b"XX12345".as_slice())
            );

            let outcome = SaslOutcome {
                code: SaslCode::Ok,
                additional_data: None,
            };
            let body = serde_amqp::to_vec(&outcome).unwrap();
            write_frame(&mut server, &body).await.unwrap();
        });

        negotiate_external(&mut client, Some("broker.example.com"), "XX12345")
            .await
            .unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_outcome_fails_negotiation() {
        let (mut client, mut server) = duplex(1024);

        let peer = tokio::spawn(async move {
            server_header_exchange(&mut server).await;
            let body = serde_amqp::to_vec(&mechanisms(&["EXTERNAL"])).unwrap();
            write_frame(&mut server, &body).await.unwrap();

            let _init = server_read_init(&mut server).await;
            let outcome = SaslOutcome {
                code: SaslCode::Auth,
                additional_data: None,
            };
            let body = serde_amqp::to_vec(&outcome).unwrap();
            write_frame(&mut server, &body).await.unwrap();
        });

        let result = negotiate_external(&mut client, None, "XX12345").await;
        assert!(matches!(
            result,
            Err(NegotiationError::Rejected {
                code: SaslCode::Auth
            })
        ));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn challenge_is_not_supported() {
        let (mut client, mut server) = duplex(1024);

        let peer = tokio::spawn(async move {
            server_header_exchange(&mut server).await;
            let body = serde_amqp::to_vec(&mechanisms(&["EXTERNAL"])).unwrap();
            write_frame(&mut server, &body).await.unwrap();

            let _init = server_read_init(&mut server).await;
            let challenge = SaslChallenge {
                challenge: Binary::from(b"more".to_vec()),
            };
            let body = serde_amqp::to_vec(&challenge).unwrap();
            write_frame(&mut server, &body).await.unwrap();
        });

        let result = negotiate_external(&mut client, None, "XX12345").await;
        assert!(matches!(result, Err(NegotiationError::UnexpectedChallenge)));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_protocol_header_aborts() {
        let (mut client, mut server) = duplex(64);

        tokio::spawn(async move {
            let mut header = [0u8; 8];
            server.read_exact(&mut header).await.unwrap();
            // plain AMQP header instead of the SASL one
            server
                .write_all(&[b'A', b'M', b'Q', b'P', 0x00, 0x01, 0x00, 0x00])
                .await
                .unwrap();
        });

        let result = negotiate_external(&mut client, None, "XX12345").await;
        assert!(matches!(
            result,
            Err(NegotiationError::ProtocolHeaderMismatch(_))
        ));
    }
}
