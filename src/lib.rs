#![deny(missing_docs, missing_debug_implementations)]

//! Client library for provisioning message deliveries and subscriptions via a
//! REST control plane ("actor API") and exchanging messages over the returned
//! AMQP 1.0 endpoint with mutually-authenticated TLS.
//!
//! The AMQP 1.0 protocol itself is handled by [`fe2o3_amqp`]; this crate owns
//! the glue around it:
//!
//! - loading the client certificate bundle and deriving the actor identity
//!   from the certificate Common Name ([`identity`]),
//! - validating the peer against a single pinned CA ([`tls`]),
//! - negotiating SASL EXTERNAL with the derived identity as the initial
//!   response ([`sasl`]),
//! - creating a delivery or subscription and polling it out of the
//!   `REQUESTED` state ([`control`]),
//! - driving a cancellable publish or receive-and-accept loop ([`session`]).
//!
//! The four binaries shipped with the crate (`delivery`, `delivery-direct`,
//! `subscription`, `subscription-direct`) wire these pieces together the same
//! way the corresponding flows in [`run`] do: resolve an endpoint (from the
//! control plane or straight from configuration), then attach a single link
//! and run until interrupted.

pub mod config;
pub mod control;
pub mod error;
pub mod identity;
pub mod message;
pub mod run;
pub mod sasl;
pub mod session;
pub mod tls;

pub use config::Config;
pub use control::{ControlPlaneClient, Endpoint, Resource, ResourceStatus};
pub use error::{Error, Result};
pub use identity::Credentials;
