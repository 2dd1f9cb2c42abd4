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

//! The endpoint discovery (EDS) policy.
//!
//! Fetches the endpoint assignment for its cluster, builds a round-robin
//! picker per locality over the usable endpoints, and weighs the
//! localities against each other with a weighted-random parent picker.
//! The assignment's drop policies are applied before every pick.

use crate::client::load_balancing::picker::{
    PickResult, Picker, RoundRobinPicker, WeightedRandomPicker,
};
use crate::client::load_balancing::{
    ClusterDiscovery, DiscoveryHandle, LbPolicy, check_service_name, shutdown_all,
    start_subchannels, status_from_xds,
};
use crate::client::name_resolution::xds::{CdsClusterName, EdsServiceName, XdsClientPoolHandle};
use crate::client::name_resolution::{HostAddress, ResolutionResult};
use crate::client::subchannel::Subchannel;
use crate::sync::SynchronizationContext;
use meshbal_xds::resource::DROP_RATE_CEILING;
use meshbal_xds::{DropOverload, XdsClient, XdsClientPool};
use rand::Rng;
use std::sync::{Arc, Mutex};
use tonic::Status;

/// A client borrowed from a pool, kept so it can be handed back to the
/// same pool on release.
type PoolLease = (Arc<XdsClientPool>, XdsClient);

pub struct EdsPolicy {
    sync: Arc<SynchronizationContext>,
    discovery_override: Option<Arc<dyn ClusterDiscovery>>,
    inner: Mutex<Inner>,
}

struct Inner {
    lease: Option<PoolLease>,
    subchannels: Vec<Arc<Subchannel>>,
    picker: Option<WeightedRandomPicker>,
    drop_policies: Vec<DropOverload>,
    shut_down: bool,
}

impl EdsPolicy {
    pub fn new(sync: Arc<SynchronizationContext>) -> Self {
        Self {
            sync,
            discovery_override: None,
            inner: Mutex::new(Inner {
                lease: None,
                subchannels: Vec::new(),
                picker: None,
                drop_policies: Vec::new(),
                shut_down: false,
            }),
        }
    }

    /// Like [`new`](Self::new) but with a fixed discovery client,
    /// bypassing the pool and the parent's handle.
    pub fn with_discovery(
        sync: Arc<SynchronizationContext>,
        discovery: Arc<dyn ClusterDiscovery>,
    ) -> Self {
        let mut policy = Self::new(sync);
        policy.discovery_override = Some(discovery);
        policy
    }

    fn release_lease(lease: Option<PoolLease>) {
        if let Some((pool, client)) = lease {
            if let Err(error) = pool.put(&client) {
                tracing::warn!(error = %error, "discovery client return failed");
            }
        }
    }
}

#[tonic::async_trait]
impl LbPolicy for EdsPolicy {
    async fn create_subchannels(
        &self,
        resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status> {
        check_service_name(service_name)?;
        if !resolution.addresses.is_empty() {
            return Err(Status::invalid_argument(
                "eds expects the resolver to supply no addresses",
            ));
        }
        let resource_name = resolution
            .attributes
            .get::<EdsServiceName>()
            .map(|n| n.0.clone())
            .or_else(|| {
                resolution
                    .attributes
                    .get::<CdsClusterName>()
                    .map(|n| n.0.clone())
            })
            .ok_or_else(|| {
                Status::failed_precondition("resolution attributes carry no endpoint service name")
            })?;

        // Prefer an explicit override, then a handle passed down by a
        // parent policy, then a fresh pool reference.
        let (discovery, lease) = match (
            &self.discovery_override,
            resolution.attributes.get::<DiscoveryHandle>(),
        ) {
            (Some(discovery), _) => (Arc::clone(discovery), None),
            (None, Some(handle)) => (Arc::clone(&handle.0), None),
            (None, None) => {
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

        let update = discovery.endpoints(&resource_name).await?;

        let mut all_subchannels = Vec::new();
        let mut children: Vec<(u32, Box<dyn Picker>)> = Vec::new();
        for locality in &update.localities {
            let addresses: Vec<HostAddress> = locality
                .endpoints
                .iter()
                .filter(|e| e.health.is_usable())
                .map(|e| HostAddress::new(e.address.clone(), Some(e.port)))
                .collect();
            if addresses.is_empty() {
                tracing::debug!(
                    zone = %locality.locality.zone,
                    "locality has no usable endpoints"
                );
                continue;
            }
            let subchannels = start_subchannels(&addresses, is_secure, &self.sync)?;
            let picker = RoundRobinPicker::new(subchannels.clone())?;
            all_subchannels.extend(subchannels);
            children.push((locality.weight, Box::new(picker)));
        }
        let picker = if children.is_empty() {
            None
        } else {
            Some(WeightedRandomPicker::new(children)?)
        };

        let previous = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shut_down {
                drop(inner);
                shutdown_all(&all_subchannels);
                Self::release_lease(lease);
                return Err(Status::failed_precondition("policy is shut down"));
            }
            inner.picker = picker;
            inner.drop_policies = update.drop_policies;
            (
                std::mem::replace(&mut inner.subchannels, all_subchannels),
                std::mem::replace(&mut inner.lease, lease),
            )
        };
        shutdown_all(&previous.0);
        Self::release_lease(previous.1);
        Ok(())
    }

    fn pick(&self) -> PickResult {
        let inner = self.inner.lock().unwrap();
        for drop_policy in &inner.drop_policies {
            if drop_policy.drop_per_million > 0
                && rand::rng().random_range(0..DROP_RATE_CEILING) < drop_policy.drop_per_million
            {
                return PickResult::Drop(Status::unavailable(format!(
                    "dropped by policy, category {}",
                    drop_policy.category
                )));
            }
        }
        match &inner.picker {
            Some(picker) => picker.pick(),
            None => PickResult::Queue,
        }
    }

    fn shutdown(&self) {
        let (subchannels, lease) = {
            let mut inner = self.inner.lock().unwrap();
            inner.shut_down = true;
            inner.picker = None;
            inner.drop_policies.clear();
            (
                std::mem::take(&mut inner.subchannels),
                inner.lease.take(),
            )
        };
        shutdown_all(&subchannels);
        Self::release_lease(lease);
    }
}
