//! Mutually-authenticated TLS configuration shared by the control-plane
//! client and the AMQP connection.
//!
//! Peer validation is deliberately relaxed: the presented chain must build
//! to the single configured CA, with revocation checking disabled and no
//! hostname verification. This mirrors the trust model of the actor
//! platform, where every peer is issued from the same private CA and
//! addressed by coordinates handed out by the control plane. It is a known
//! relaxation, not a default to copy elsewhere.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::identity::Credentials;

/// Error raised while assembling the TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// The CA certificate was rejected by the trust store.
    #[error("unable to use CA certificate as trust anchor: {0}")]
    UntrustworthyCa(#[source] rustls::Error),

    /// The client certificate chain or key was rejected.
    #[error("unable to use client certificate chain and key: {0}")]
    BadClientAuth(#[source] rustls::Error),

    /// The protocol version selection was rejected by the provider.
    #[error("unable to configure TLS protocol versions: {0}")]
    UnsupportedProtocolVersions(#[source] rustls::Error),
}

/// Accepts a peer iff its chain builds to the single pinned CA.
///
/// Revocation is not checked and the peer name is ignored; see the module
/// documentation for why this relaxation is in place.
#[derive(Debug)]
pub struct PinnedCaVerifier {
    roots: RootCertStore,
    supported: WebPkiSupportedAlgorithms,
}

impl PinnedCaVerifier {
    /// Builds a verifier trusting only the given CA certificates.
    pub fn new(ca: &[CertificateDer<'static>]) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in ca {
            roots.add(cert.clone()).map_err(TlsError::UntrustworthyCa)?;
        }
        Ok(Self {
            roots,
            supported: provider().signature_verification_algorithms,
        })
    }
}

impl ServerCertVerifier for PinnedCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.supported.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

/// Builds the client TLS configuration: TLS 1.3, the pinned-CA verifier and
/// the actor certificate chain as client auth.
pub fn client_config(credentials: &Credentials) -> Result<ClientConfig, TlsError> {
    let verifier = PinnedCaVerifier::new(credentials.ca())?;
    let config = ClientConfig::builder_with_provider(Arc::new(provider()))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(TlsError::UnsupportedProtocolVersions)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(credentials.chain().to_vec(), credentials.key().clone_key())
        .map_err(TlsError::BadClientAuth)?;
    Ok(config)
}

fn provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    use super::*;
    use crate::identity::Credentials;

    fn ca_pair(name: &str) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        (params.self_signed(&key).unwrap(), key)
    }

    fn leaf_signed_by(name: &str, ca: &rcgen::Certificate, ca_key: &KeyPair) -> rcgen::Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        params.signed_by(&key, ca, ca_key).unwrap()
    }

    fn pinned_verifier(ca: &rcgen::Certificate) -> PinnedCaVerifier {
        PinnedCaVerifier::new(&[ca.der().clone()]).unwrap()
    }

    #[test]
    fn accepts_peer_signed_by_pinned_ca() {
        let (ca, ca_key) = ca_pair("Pinned CA");
        let leaf = leaf_signed_by("broker.example.com", &ca, &ca_key);

        let verifier = pinned_verifier(&ca);
        let name = ServerName::try_from("broker.example.com").unwrap();
        verifier
            .verify_server_cert(leaf.der(), &[], &name, &[], UnixTime::now())
            .unwrap();
    }

    #[test]
    fn peer_name_is_not_checked() {
        let (ca, ca_key) = ca_pair("Pinned CA");
        let leaf = leaf_signed_by("broker.example.com", &ca, &ca_key);

        let verifier = pinned_verifier(&ca);
        let unrelated = ServerName::try_from("somewhere-else.example.org").unwrap();
        verifier
            .verify_server_cert(leaf.der(), &[], &unrelated, &[], UnixTime::now())
            .unwrap();
    }

    #[test]
    fn rejects_peer_from_other_ca() {
        let (ca, _ca_key) = ca_pair("Pinned CA");
        let (other_ca, other_key) = ca_pair("Other CA");
        let leaf = leaf_signed_by("broker.example.com", &other_ca, &other_key);

        let verifier = pinned_verifier(&ca);
        let name = ServerName::try_from("broker.example.com").unwrap();
        let result = verifier.verify_server_cert(leaf.der(), &[], &name, &[], UnixTime::now());
        assert!(result.is_err());
    }

    #[test]
    fn builds_client_config_with_client_auth() {
        let (ca, ca_key) = ca_pair("Pinned CA");
        let client_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "XX12345");
        let client = params.signed_by(&client_key, &ca, &ca_key).unwrap();

        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle
            .write_all(format!("{}{}", client.pem(), client_key.serialize_pem()).as_bytes())
            .unwrap();
        let mut ca_file = tempfile::NamedTempFile::new().unwrap();
        ca_file.write_all(ca.pem().as_bytes()).unwrap();

        let credentials = Credentials::load(bundle.path(), ca_file.path()).unwrap();
        let config = client_config(&credentials).unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
    }
}
