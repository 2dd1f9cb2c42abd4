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

//! The flat xds policy: a one-shot cluster-to-endpoints walk.
//!
//! Unlike the cds/eds pair, this policy owns its discovery client
//! directly and collapses the hierarchy: it lists all clusters, takes the
//! first one whose service name contains the target service name, and
//! round-robins over that cluster's endpoints with no locality
//! weighting. It predates the cds/eds pair and stays supported alongside
//! it.

use crate::client::load_balancing::picker::{PickResult, Picker, RoundRobinPicker};
use crate::client::load_balancing::{
    ClusterDiscovery, LbPolicy, check_service_name, shutdown_all, start_subchannels,
};
use crate::client::name_resolution::{HostAddress, ResolutionResult};
use crate::client::subchannel::Subchannel;
use crate::sync::SynchronizationContext;
use std::sync::{Arc, Mutex};
use tonic::Status;

pub struct XdsPolicy {
    sync: Arc<SynchronizationContext>,
    discovery: Arc<dyn ClusterDiscovery>,
    inner: Mutex<Inner>,
}

struct Inner {
    subchannels: Vec<Arc<Subchannel>>,
    picker: Option<RoundRobinPicker>,
    shut_down: bool,
}

impl XdsPolicy {
    pub fn new(sync: Arc<SynchronizationContext>, discovery: Arc<dyn ClusterDiscovery>) -> Self {
        Self {
            sync,
            discovery,
            inner: Mutex::new(Inner {
                subchannels: Vec::new(),
                picker: None,
                shut_down: false,
            }),
        }
    }
}

#[tonic::async_trait]
impl LbPolicy for XdsPolicy {
    async fn create_subchannels(
        &self,
        _resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status> {
        check_service_name(service_name)?;

        let clusters = self.discovery.clusters().await?;
        let needle = service_name.to_ascii_lowercase();
        let cluster = clusters
            .iter()
            .find(|c| {
                c.endpoint_resource_name()
                    .to_ascii_lowercase()
                    .contains(&needle)
            })
            .ok_or_else(|| {
                Status::not_found(format!("no cluster serving {service_name}"))
            })?;

        let update = self
            .discovery
            .endpoints(cluster.endpoint_resource_name())
            .await?;
        let addresses: Vec<HostAddress> = update
            .localities
            .iter()
            .flat_map(|l| l.endpoints.iter())
            .filter(|e| e.health.is_usable())
            .map(|e| HostAddress::new(e.address.clone(), Some(e.port)))
            .collect();
        if addresses.is_empty() {
            return Err(Status::not_found(format!(
                "cluster {} has no usable endpoints",
                cluster.cluster_name
            )));
        }

        let subchannels = start_subchannels(&addresses, is_secure, &self.sync)?;
        let picker = RoundRobinPicker::new(subchannels.clone())?;

        let previous = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shut_down {
                shutdown_all(&subchannels);
                return Err(Status::failed_precondition("policy is shut down"));
            }
            inner.picker = Some(picker);
            std::mem::replace(&mut inner.subchannels, subchannels)
        };
        shutdown_all(&previous);
        Ok(())
    }

    fn pick(&self) -> PickResult {
        match &self.inner.lock().unwrap().picker {
            Some(picker) => picker.pick(),
            None => PickResult::Queue,
        }
    }

    fn shutdown(&self) {
        let subchannels = {
            let mut inner = self.inner.lock().unwrap();
            inner.shut_down = true;
            inner.picker = None;
            std::mem::take(&mut inner.subchannels)
        };
        shutdown_all(&subchannels);
    }
}
