/*
 *
 * Copyright 2025 meshbal authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Load balancing policies.
//!
//! A policy turns a [`ResolutionResult`] into subchannels and serves
//! pick requests over them. Address-list policies (`pick_first`,
//! `round_robin`) build subchannels directly; discovery-driven policies
//! (`cds`, `eds`, `xds`, `grpclb`) obtain their membership from a control
//! plane or a lookaside balancer first. Policies are selected by name
//! through a [`registry::LbPolicyRegistry`].

pub mod cds;
pub mod eds;
pub mod grpclb;
pub mod pick_first;
pub mod picker;
pub mod registry;
pub mod round_robin;
pub mod xds;

use crate::client::name_resolution::{HostAddress, ResolutionResult};
use crate::client::subchannel::Subchannel;
use crate::sync::SynchronizationContext;
use meshbal_xds::{ClusterUpdate, EndpointUpdate, XdsClient};
use picker::PickResult;
use std::sync::Arc;
use tonic::Status;

/// A load balancing policy instance.
///
/// One instance serves one channel. `create_subchannels` is called with
/// each resolution pass; `pick` serves calls; `shutdown` disposes all
/// owned subchannels and is idempotent.
#[tonic::async_trait]
pub trait LbPolicy: Send + Sync {
    /// Builds or rebuilds the subchannel set for a resolution result.
    ///
    /// `service_name` must be non-blank. `is_secure` selects the default
    /// port (443 or 80) for addresses that omit one.
    async fn create_subchannels(
        &self,
        resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status>;

    /// Selects a subchannel for the next call.
    fn pick(&self) -> PickResult;

    /// Shuts down the policy and everything it owns. Idempotent.
    fn shutdown(&self);
}

/// The discovery lookups the xDS-driven policies need.
///
/// Implemented by [`XdsClient`] for production; tests substitute a
/// fixture through the policies' `with_discovery` constructors or the
/// [`DiscoveryHandle`] attribute.
#[tonic::async_trait]
pub trait ClusterDiscovery: Send + Sync {
    async fn clusters(&self) -> Result<Vec<ClusterUpdate>, Status>;
    async fn cluster(&self, name: &str) -> Result<ClusterUpdate, Status>;
    async fn endpoints(&self, name: &str) -> Result<EndpointUpdate, Status>;
}

#[tonic::async_trait]
impl ClusterDiscovery for XdsClient {
    async fn clusters(&self) -> Result<Vec<ClusterUpdate>, Status> {
        XdsClient::clusters(self).await.map_err(status_from_xds)
    }

    async fn cluster(&self, name: &str) -> Result<ClusterUpdate, Status> {
        XdsClient::cluster(self, name).await.map_err(status_from_xds)
    }

    async fn endpoints(&self, name: &str) -> Result<EndpointUpdate, Status> {
        XdsClient::endpoints(self, name)
            .await
            .map_err(status_from_xds)
    }
}

/// Attribute a parent discovery policy sets so its child queries the same
/// discovery client instead of taking its own pool reference.
#[derive(Clone)]
pub struct DiscoveryHandle(pub Arc<dyn ClusterDiscovery>);

pub(crate) fn status_from_xds(error: meshbal_xds::Error) -> Status {
    use meshbal_xds::Error;
    match error {
        Error::DoesNotExist(name) => Status::not_found(name),
        Error::Validation(msg) | Error::InvalidOperation(msg) | Error::Bootstrap(msg) => {
            Status::failed_precondition(msg)
        }
        other => Status::unavailable(other.to_string()),
    }
}

pub(crate) fn check_service_name(service_name: &str) -> Result<(), Status> {
    if service_name.trim().is_empty() {
        return Err(Status::invalid_argument("service name must not be blank"));
    }
    Ok(())
}

/// The non-balancer addresses of a resolution pass, in order.
pub(crate) fn backend_addresses(resolution: &ResolutionResult) -> Vec<HostAddress> {
    resolution
        .addresses
        .iter()
        .filter(|a| !a.is_load_balancer)
        .cloned()
        .collect()
}

/// Builds and starts one subchannel per address, preserving order.
pub(crate) fn start_subchannels(
    addresses: &[HostAddress],
    is_secure: bool,
    sync: &Arc<SynchronizationContext>,
) -> Result<Vec<Arc<Subchannel>>, Status> {
    let mut subchannels = Vec::with_capacity(addresses.len());
    for address in addresses {
        let subchannel = Subchannel::new(
            address.host.clone(),
            address.port_or_default(is_secure),
            Arc::clone(sync),
        );
        subchannel.start()?;
        subchannels.push(subchannel);
    }
    Ok(subchannels)
}

/// Shuts down a batch of subchannels, typically the previous generation
/// after a membership change.
pub(crate) fn shutdown_all(subchannels: &[Arc<Subchannel>]) {
    for subchannel in subchannels {
        subchannel.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ClusterDiscovery;
    use meshbal_xds::{
        ClusterUpdate, Endpoint, EndpointHealth, EndpointUpdate, Locality, LocalityEndpoints,
    };
    use std::collections::HashMap;
    use tonic::Status;

    /// In-memory discovery data for policy tests.
    #[derive(Default)]
    pub(crate) struct FakeDiscovery {
        pub(crate) clusters: HashMap<String, ClusterUpdate>,
        pub(crate) endpoints: HashMap<String, EndpointUpdate>,
    }

    #[tonic::async_trait]
    impl ClusterDiscovery for FakeDiscovery {
        async fn clusters(&self) -> Result<Vec<ClusterUpdate>, Status> {
            Ok(self.clusters.values().cloned().collect())
        }

        async fn cluster(&self, name: &str) -> Result<ClusterUpdate, Status> {
            self.clusters
                .get(name)
                .cloned()
                .ok_or_else(|| Status::not_found(name.to_string()))
        }

        async fn endpoints(&self, name: &str) -> Result<EndpointUpdate, Status> {
            self.endpoints
                .get(name)
                .cloned()
                .ok_or_else(|| Status::not_found(name.to_string()))
        }
    }

    pub(crate) fn locality(zone: &str, weight: u32, endpoints: Vec<Endpoint>) -> LocalityEndpoints {
        LocalityEndpoints {
            locality: Locality {
                region: "us-east".to_string(),
                zone: zone.to_string(),
                sub_zone: String::new(),
            },
            weight,
            priority: 0,
            endpoints,
        }
    }

    pub(crate) fn endpoint(address: &str, port: u16, health: EndpointHealth) -> Endpoint {
        Endpoint {
            address: address.to_string(),
            port,
            health,
            weight: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_validation() {
        assert!(check_service_name("my-service").is_ok());
        assert!(check_service_name("").is_err());
        assert!(check_service_name("   ").is_err());
    }

    #[test]
    fn test_backend_addresses_filters_balancers() {
        let resolution = ResolutionResult::new(vec![
            HostAddress::new("10.0.0.1", Some(80)),
            HostAddress::balancer("lb.svc", 9000, 0, 0),
            HostAddress::new("10.0.0.2", Some(80)),
        ]);
        let backends = backend_addresses(&resolution);
        assert_eq!(backends.len(), 2);
        assert!(backends.iter().all(|a| !a.is_load_balancer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_subchannels_uses_default_ports() {
        let sync = Arc::new(SynchronizationContext::default());
        let addresses = vec![
            HostAddress::new("10.0.0.1", None),
            HostAddress::new("10.0.0.2", Some(50051)),
        ];
        let subchannels = start_subchannels(&addresses, true, &sync).unwrap();
        assert_eq!(subchannels[0].port(), 443);
        assert_eq!(subchannels[1].port(), 50051);
    }
}
