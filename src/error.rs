//! Crate-level error type aggregating the per-module errors.

use crate::config::ConfigError;
use crate::control::ControlPlaneError;
use crate::identity::CredentialError;
use crate::message::PropertiesError;
use crate::session::DriverError;
use crate::tls::TlsError;

/// Any error a flow can end with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configured value could not be interpreted.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Certificate material could not be loaded.
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// The TLS configuration could not be assembled.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The configured application properties could not be mapped.
    #[error(transparent)]
    Properties(#[from] PropertiesError),

    /// A control-plane operation failed.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// The AMQP connection or loop failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Result alias for flow-level operations.
pub type Result<T> = std::result::Result<T, Error>;
