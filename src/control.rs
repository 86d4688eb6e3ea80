//! Control-plane client: create, inspect and delete deliveries or
//! subscriptions, and poll a created resource until it settles.
//!
//! Every call goes to `https://{host}:{port}/{common_name}/{resource}[/{id}]`
//! over the same pinned-CA, client-certificate TLS configuration the AMQP
//! connection uses.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fixed delay between two status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The two provisionable resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Outbound: messages are published into a delivery.
    Deliveries,
    /// Inbound: messages are consumed from a subscription.
    Subscriptions,
}

impl Resource {
    /// The URL path segment of the resource collection.
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Deliveries => "deliveries",
            Resource::Subscriptions => "subscriptions",
        }
    }

    /// Singular name used in log and error messages.
    pub fn singular(&self) -> &'static str {
        match self {
            Resource::Deliveries => "delivery",
            Resource::Subscriptions => "subscription",
        }
    }
}

/// Lifecycle status reported by the control plane.
///
/// `Requested` is the only transient state; everything that is not
/// `Requested` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ResourceStatus {
    /// Provisioning is still in progress.
    Requested,
    /// The resource is ready and carries endpoints.
    Created,
    /// Any other terminal state, kept verbatim.
    Other(String),
}

impl From<String> for ResourceStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "REQUESTED" => ResourceStatus::Requested,
            "CREATED" => ResourceStatus::Created,
            _ => ResourceStatus::Other(value),
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::Requested => f.write_str("REQUESTED"),
            ResourceStatus::Created => f.write_str("CREATED"),
            ResourceStatus::Other(other) => f.write_str(other),
        }
    }
}

/// AMQP endpoint coordinates returned by the control plane.
///
/// Deliveries carry a `target` address, subscriptions a `source` address;
/// both deserialize into [`Endpoint::address`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Link address to attach to.
    #[serde(alias = "target", alias = "source")]
    pub address: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "amqps://{}:{}/{}", self.host, self.port, self.address)
    }
}

/// Response to a create request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedResource {
    /// Identifier of the freshly created resource.
    pub id: String,
}

/// Response to a status request.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDescription {
    /// Current lifecycle status.
    pub status: ResourceStatus,
    /// Endpoints, populated once the resource is `CREATED`. Only the first
    /// one is ever used; extras are ignored.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    selector: &'a str,
}

/// Error raised by control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// The HTTP exchange failed or returned a non-success status.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The resource settled in a state other than `CREATED`.
    #[error("unable to use {resource} {id}: status {status}")]
    NotUsable {
        /// Singular resource name.
        resource: &'static str,
        /// Identifier of the resource.
        id: String,
        /// The terminal status it settled in.
        status: ResourceStatus,
    },

    /// The resource settled as `CREATED` but without endpoints.
    #[error("no endpoints available for {resource} {id}")]
    NoEndpoints {
        /// Singular resource name.
        resource: &'static str,
        /// Identifier of the resource.
        id: String,
    },
}

/// Client for the actor control-plane API.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    host: String,
    port: u16,
    common_name: String,
}

impl ControlPlaneClient {
    /// Creates a client for `https://{host}:{port}/{common_name}` using the
    /// given TLS configuration for mutual authentication.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        common_name: impl Into<String>,
        tls: rustls::ClientConfig,
    ) -> Result<Self, ControlPlaneError> {
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .build()?;
        Ok(Self {
            http,
            host: host.into(),
            port,
            common_name: common_name.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "https://{}:{}/{}/{}",
            self.host, self.port, self.common_name, path
        )
    }

    /// `POST /{resource}` with the given selector.
    pub async fn create(
        &self,
        resource: Resource,
        selector: &str,
    ) -> Result<CreatedResource, ControlPlaneError> {
        let created: CreatedResource = self
            .http
            .post(self.url(resource.path()))
            .json(&CreateRequest { selector })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(id = %created.id, "{} create response received", resource.singular());
        Ok(created)
    }

    /// `GET /{resource}/{id}`.
    pub async fn get(
        &self,
        resource: Resource,
        id: &str,
    ) -> Result<ResourceDescription, ControlPlaneError> {
        let description: ResourceDescription = self
            .http
            .get(self.url(&format!("{}/{}", resource.path(), id)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(id, status = %description.status, "{} status response received", resource.singular());
        Ok(description)
    }

    /// `DELETE /{resource}/{id}`. Not used by the shipped flows, which leave
    /// their resources behind, but part of the API surface.
    pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), ControlPlaneError> {
        self.http
            .delete(self.url(&format!("{}/{}", resource.path(), id)))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Creates a resource and polls it until it settles, returning the first
    /// endpoint of a `CREATED` resource.
    ///
    /// Polling repeats every [`POLL_INTERVAL`] for as long as the status is
    /// `REQUESTED`, without a bound; a control plane that never settles will
    /// keep this call pending until the surrounding task is cancelled.
    pub async fn resolve_endpoint(
        &self,
        resource: Resource,
        selector: &str,
    ) -> Result<Endpoint, ControlPlaneError> {
        let created = self.create(resource, selector).await?;
        let description =
            poll_until_settled(POLL_INTERVAL, || self.get(resource, &created.id)).await?;
        info!(
            id = %created.id,
            status = %description.status,
            "{} settled",
            resource.singular()
        );

        match description.status {
            ResourceStatus::Created => {
                description
                    .endpoints
                    .into_iter()
                    .next()
                    .ok_or(ControlPlaneError::NoEndpoints {
                        resource: resource.singular(),
                        id: created.id,
                    })
            }
            status => Err(ControlPlaneError::NotUsable {
                resource: resource.singular(),
                id: created.id,
                status,
            }),
        }
    }
}

/// Fetches the resource description until its status leaves `REQUESTED`,
/// sleeping `interval` between attempts.
async fn poll_until_settled<F, Fut>(
    interval: Duration,
    mut fetch: F,
) -> Result<ResourceDescription, ControlPlaneError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<ResourceDescription, ControlPlaneError>>,
{
    loop {
        let description = fetch().await?;
        match description.status {
            ResourceStatus::Requested => tokio::time::sleep(interval).await,
            _ => return Ok(description),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    fn description(status: &str, endpoints: Vec<Endpoint>) -> ResourceDescription {
        ResourceDescription {
            status: ResourceStatus::from(status.to_string()),
            endpoints,
        }
    }

    fn endpoint(address: &str) -> Endpoint {
        Endpoint {
            host: "broker.example.com".to_string(),
            port: 5671,
            address: address.to_string(),
        }
    }

    #[test]
    fn status_strings_classify() {
        assert_eq!(
            ResourceStatus::from("REQUESTED".to_string()),
            ResourceStatus::Requested
        );
        assert_eq!(
            ResourceStatus::from("CREATED".to_string()),
            ResourceStatus::Created
        );
        assert_eq!(
            ResourceStatus::from("FAILED".to_string()),
            ResourceStatus::Other("FAILED".to_string())
        );
        assert_eq!(ResourceStatus::from("FAILED".to_string()).to_string(), "FAILED");
    }

    #[test]
    fn endpoint_accepts_target_and_source() {
        let delivery: Endpoint =
            serde_json::from_str(r#"{"host":"h","port":5671,"target":"t-1"}"#).unwrap();
        assert_eq!(delivery.address, "t-1");

        let subscription: Endpoint =
            serde_json::from_str(r#"{"host":"h","port":5671,"source":"s-1"}"#).unwrap();
        assert_eq!(subscription.address, "s-1");
    }

    #[test]
    fn description_without_endpoints_deserializes() {
        let description: ResourceDescription =
            serde_json::from_str(r#"{"status":"REQUESTED"}"#).unwrap();
        assert_eq!(description.status, ResourceStatus::Requested);
        assert!(description.endpoints.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_created_with_fixed_delay() {
        let responses = Mutex::new(VecDeque::from([
            description("REQUESTED", vec![]),
            description("REQUESTED", vec![]),
            description("CREATED", vec![endpoint("t-1")]),
        ]));
        let calls = AtomicUsize::new(0);

        let started = Instant::now();
        let settled = poll_until_settled(POLL_INTERVAL, || {
            calls.fetch_add(1, Ordering::SeqCst);
            let next = responses.lock().unwrap().pop_front().unwrap();
            async move { Ok(next) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(settled.status, ResourceStatus::Created);
        assert_eq!(settled.endpoints[0].address, "t-1");
        // two REQUESTED responses, one fixed delay after each
        assert_eq!(started.elapsed(), 2 * POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_stops_polling() {
        let responses = Mutex::new(VecDeque::from([
            description("REQUESTED", vec![]),
            description("FAILED", vec![]),
        ]));
        let calls = AtomicUsize::new(0);

        let settled = poll_until_settled(POLL_INTERVAL, || {
            calls.fetch_add(1, Ordering::SeqCst);
            let next = responses.lock().unwrap().pop_front().unwrap();
            async move { Ok(next) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            settled.status,
            ResourceStatus::Other("FAILED".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_propagate() {
        let result = poll_until_settled(POLL_INTERVAL, || async {
            Err(ControlPlaneError::NotUsable {
                resource: "delivery",
                id: "d-1".to_string(),
                status: ResourceStatus::Other("FAILED".to_string()),
            })
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn not_usable_error_names_the_resource_id() {
        let err = ControlPlaneError::NotUsable {
            resource: "delivery",
            id: "d-42".to_string(),
            status: ResourceStatus::Other("FAILED".to_string()),
        };
        assert_eq!(err.to_string(), "unable to use delivery d-42: status FAILED");
    }
}
