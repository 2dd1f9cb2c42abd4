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

//! The cluster discovery (CDS) policy.
//!
//! Fetches the cluster configuration named by the resolution attributes
//! and delegates picking to a child policy, normally the endpoint
//! discovery policy, chosen by the cluster's `lb_policy`. The discovery
//! client comes from the shared pool carried on the attributes and is
//! returned to the pool on shutdown.

use crate::client::load_balancing::picker::PickResult;
use crate::client::load_balancing::registry::LbPolicyRegistry;
use crate::client::load_balancing::{
    ClusterDiscovery, DiscoveryHandle, LbPolicy, check_service_name, status_from_xds,
};
use crate::client::name_resolution::ResolutionResult;
use crate::client::name_resolution::xds::{CdsClusterName, EdsServiceName, XdsClientPoolHandle};
use meshbal_xds::{XdsClient, XdsClientPool};
use std::sync::{Arc, Mutex};
use tonic::Status;

/// A client borrowed from a pool, kept so it can be handed back to the
/// same pool on release.
type PoolLease = (Arc<XdsClientPool>, XdsClient);

pub struct CdsPolicy {
    registry: Arc<LbPolicyRegistry>,
    discovery_override: Option<Arc<dyn ClusterDiscovery>>,
    inner: Mutex<Inner>,
}

struct Inner {
    lease: Option<PoolLease>,
    child: Option<Arc<dyn LbPolicy>>,
    shut_down: bool,
}

impl CdsPolicy {
    pub fn new(registry: Arc<LbPolicyRegistry>) -> Self {
        Self {
            registry,
            discovery_override: None,
            inner: Mutex::new(Inner {
                lease: None,
                child: None,
                shut_down: false,
            }),
        }
    }

    /// Like [`new`](Self::new) but with a fixed discovery client,
    /// bypassing the pool.
    pub fn with_discovery(
        registry: Arc<LbPolicyRegistry>,
        discovery: Arc<dyn ClusterDiscovery>,
    ) -> Self {
        Self {
            registry,
            discovery_override: Some(discovery),
            inner: Mutex::new(Inner {
                lease: None,
                child: None,
                shut_down: false,
            }),
        }
    }

    fn release(&self, child: Option<Arc<dyn LbPolicy>>, lease: Option<PoolLease>) {
        if let Some(child) = child {
            child.shutdown();
        }
        if let Some((pool, client)) = lease {
            if let Err(error) = pool.put(&client) {
                tracing::warn!(error = %error, "discovery client return failed");
            }
        }
    }
}

#[tonic::async_trait]
impl LbPolicy for CdsPolicy {
    async fn create_subchannels(
        &self,
        resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status> {
        check_service_name(service_name)?;
        if !resolution.addresses.is_empty() {
            return Err(Status::invalid_argument(
                "cds expects the resolver to supply no addresses",
            ));
        }
        let cluster_name = resolution
            .attributes
            .get::<CdsClusterName>()
            .ok_or_else(|| {
                Status::failed_precondition("resolution attributes carry no cluster name")
            })?
            .0
            .clone();

        let (discovery, lease) = match &self.discovery_override {
            Some(discovery) => (Arc::clone(discovery), None),
            None => {
                let pool = resolution
                    .attributes
                    .get::<XdsClientPoolHandle>()
                    .ok_or_else(|| {
                        Status::failed_precondition(
                            "resolution attributes carry no discovery client pool",
                        )
                    })?
                    .0
                    .clone();
                let client = pool.get().map_err(status_from_xds)?;
                (
                    Arc::new(client.clone()) as Arc<dyn ClusterDiscovery>,
                    Some((pool, client)),
                )
            }
        };

        let update = discovery.cluster(&cluster_name).await?;
        tracing::debug!(
            cluster = %update.cluster_name,
            child = %update.lb_policy,
            "cluster update received"
        );
        let child = self.registry.select(&[update.lb_policy.as_str()])?;

        let child_resolution = ResolutionResult::new(vec![]).with_attributes(
            resolution
                .attributes
                .add(EdsServiceName(update.endpoint_resource_name().to_string()))
                .add(DiscoveryHandle(Arc::clone(&discovery))),
        );
        child
            .create_subchannels(child_resolution, service_name, is_secure)
            .await?;

        let previous = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shut_down {
                drop(inner);
                self.release(Some(child), lease);
                return Err(Status::failed_precondition("policy is shut down"));
            }
            (
                inner.child.replace(child),
                std::mem::replace(&mut inner.lease, lease),
            )
        };
        self.release(previous.0, previous.1);
        Ok(())
    }

    fn pick(&self) -> PickResult {
        match &self.inner.lock().unwrap().child {
            Some(child) => child.pick(),
            None => PickResult::Queue,
        }
    }

    fn shutdown(&self) {
        let (child, lease) = {
            let mut inner = self.inner.lock().unwrap();
            inner.shut_down = true;
            (inner.child.take(), inner.lease.take())
        };
        self.release(child, lease);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::load_balancing::eds::EdsPolicy;
    use crate::client::load_balancing::testing::{FakeDiscovery, endpoint, locality};
    use crate::client::service_config::EDS_EXPERIMENTAL;
    use crate::sync::SynchronizationContext;
    use meshbal_xds::{ClusterUpdate, EndpointHealth, EndpointUpdate};

    fn fixture() -> Arc<FakeDiscovery> {
        let mut discovery = FakeDiscovery::default();
        discovery.clusters.insert(
            "backend-cluster".to_string(),
            ClusterUpdate {
                cluster_name: "backend-cluster".to_string(),
                eds_service_name: Some("backend-eds".to_string()),
                lb_policy: EDS_EXPERIMENTAL.to_string(),
                lrs_server_self: false,
            },
        );
        discovery.endpoints.insert(
            "backend-eds".to_string(),
            EndpointUpdate {
                cluster_name: "backend-eds".to_string(),
                localities: vec![locality(
                    "a",
                    1,
                    vec![endpoint("10.2.0.1", 8080, EndpointHealth::Healthy)],
                )],
                drop_policies: vec![],
            },
        );
        Arc::new(discovery)
    }

    fn registry_with_eds() -> Arc<LbPolicyRegistry> {
        let mut registry = LbPolicyRegistry::new();
        registry.register(
            EDS_EXPERIMENTAL,
            Box::new(|| {
                Arc::new(EdsPolicy::new(Arc::new(SynchronizationContext::default())))
            }),
        );
        Arc::new(registry)
    }

    fn cluster_resolution() -> ResolutionResult {
        ResolutionResult::new(vec![]).with_attributes(
            crate::attributes::Attributes::new()
                .add(CdsClusterName("backend-cluster".to_string())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegates_to_child_named_by_cluster() {
        let policy = CdsPolicy::with_discovery(registry_with_eds(), fixture());
        policy
            .create_subchannels(cluster_resolution(), "svc", false)
            .await
            .unwrap();

        match policy.pick() {
            PickResult::Ready(sc) => {
                assert_eq!(sc.host(), "10.2.0.1");
                assert_eq!(sc.port(), 8080);
            }
            other => panic!("expected ready pick, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_non_empty_address_list() {
        let policy = CdsPolicy::with_discovery(registry_with_eds(), fixture());
        let resolution = ResolutionResult::new(vec![
            crate::client::name_resolution::HostAddress::new("10.0.0.1", Some(80)),
        ]);
        let err = policy
            .create_subchannels(resolution, "svc", false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cluster_name_attribute_errors() {
        let policy = CdsPolicy::with_discovery(registry_with_eds(), fixture());
        let err = policy
            .create_subchannels(ResolutionResult::new(vec![]), "svc", false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pool_attribute_errors() {
        let policy = CdsPolicy::new(registry_with_eds());
        let err = policy
            .create_subchannels(cluster_resolution(), "svc", false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disposes_child() {
        let policy = CdsPolicy::with_discovery(registry_with_eds(), fixture());
        policy
            .create_subchannels(cluster_resolution(), "svc", false)
            .await
            .unwrap();
        let sc = match policy.pick() {
            PickResult::Ready(sc) => sc,
            other => panic!("expected ready pick, got {other:?}"),
        };

        policy.shutdown();
        policy.shutdown();
        tokio::task::yield_now().await;

        assert_eq!(sc.state(), crate::client::ConnectivityState::Shutdown);
        assert!(matches!(policy.pick(), PickResult::Queue));
    }
}
