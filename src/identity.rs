//! Client credential loading and identity derivation.
//!
//! The actor authenticates with a single PEM bundle holding its certificate
//! chain and private key, plus a separate CA certificate that pins the peer.
//! The actor identity presented during SASL EXTERNAL is the value of the
//! `CN=` component of the certificate Subject, or the whole Subject DN when
//! no such component exists.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Error raised while loading certificate material.
///
/// All of these are fatal; nothing touches the network before the
/// credentials have loaded successfully.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A PEM file could not be read or parsed.
    #[error("unable to read {}: {source}", .path.display())]
    Io {
        /// The offending file.
        path: PathBuf,
        /// The underlying I/O or PEM error.
        source: io::Error,
    },

    /// The bundle contains no certificate.
    #[error("no certificate found in {}", .0.display())]
    MissingCertificate(PathBuf),

    /// The bundle contains no private key.
    #[error("no private key found in {}", .0.display())]
    MissingPrivateKey(PathBuf),

    /// The leaf certificate is not parsable X.509.
    #[error("unable to parse client certificate: {0}")]
    MalformedCertificate(String),
}

/// Client certificate chain, private key and the identity derived from them.
#[derive(Debug)]
pub struct Credentials {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    ca: Vec<CertificateDer<'static>>,
    common_name: String,
}

impl Credentials {
    /// Loads the combined certificate-chain-and-key bundle and the CA
    /// certificate, deriving the actor identity from the leaf certificate.
    pub fn load(
        cert_chain_and_key: impl AsRef<Path>,
        ca_certificate: impl AsRef<Path>,
    ) -> Result<Self, CredentialError> {
        let bundle = cert_chain_and_key.as_ref();
        let chain = read_certs(bundle)?;
        let leaf = chain
            .first()
            .ok_or_else(|| CredentialError::MissingCertificate(bundle.to_path_buf()))?;
        let common_name = common_name_from_der(leaf)?;

        let key = read_private_key(bundle)?
            .ok_or_else(|| CredentialError::MissingPrivateKey(bundle.to_path_buf()))?;

        let ca_path = ca_certificate.as_ref();
        let ca = read_certs(ca_path)?;
        if ca.is_empty() {
            return Err(CredentialError::MissingCertificate(ca_path.to_path_buf()));
        }

        Ok(Self {
            chain,
            key,
            ca,
            common_name,
        })
    }

    /// The certificate chain from the bundle, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// The private key from the bundle.
    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// The pinned CA certificates.
    pub fn ca(&self) -> &[CertificateDer<'static>] {
        &self.ca
    }

    /// The identity derived from the leaf certificate Subject.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }
}

/// Extracts the common name from a Subject Distinguished Name string.
///
/// The DN is split on `,`, each component trimmed, and the value after the
/// first `CN=` prefix returned. A DN without a `CN=` component is returned
/// unchanged, e.g. `CN=XX99999, O=Company` yields `XX99999` while
/// `O=Company` yields `O=Company`.
pub fn common_name_from_dn(subject: &str) -> &str {
    subject
        .split(',')
        .map(str::trim)
        .find_map(|component| component.strip_prefix("CN="))
        .unwrap_or(subject)
}

fn common_name_from_der(cert: &CertificateDer<'_>) -> Result<String, CredentialError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|err| CredentialError::MalformedCertificate(err.to_string()))?;
    let subject = parsed.subject().to_string();
    Ok(common_name_from_dn(&subject).to_string())
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_private_key(path: &Path) -> Result<Option<PrivateKeyDer<'static>>, CredentialError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn open(path: &Path) -> Result<BufReader<File>, CredentialError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })
}
