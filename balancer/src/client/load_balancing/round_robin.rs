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

//! The round-robin policy: one subchannel per backend address, cycled in
//! address order.

use crate::client::load_balancing::picker::{PickResult, Picker, RoundRobinPicker};
use crate::client::load_balancing::{
    LbPolicy, backend_addresses, check_service_name, shutdown_all, start_subchannels,
};
use crate::client::name_resolution::ResolutionResult;
use crate::client::subchannel::Subchannel;
use crate::sync::SynchronizationContext;
use std::sync::{Arc, Mutex};
use tonic::Status;

pub struct RoundRobinPolicy {
    sync: Arc<SynchronizationContext>,
    inner: Mutex<Inner>,
}

struct Inner {
    subchannels: Vec<Arc<Subchannel>>,
    picker: Option<RoundRobinPicker>,
    shut_down: bool,
}

impl RoundRobinPolicy {
    pub fn new(sync: Arc<SynchronizationContext>) -> Self {
        Self {
            sync,
            inner: Mutex::new(Inner {
                subchannels: Vec::new(),
                picker: None,
                shut_down: false,
            }),
        }
    }
}

#[tonic::async_trait]
impl LbPolicy for RoundRobinPolicy {
    async fn create_subchannels(
        &self,
        resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status> {
        check_service_name(service_name)?;
        let backends = backend_addresses(&resolution);
        if backends.is_empty() {
            return Err(Status::invalid_argument(
                "round_robin requires at least one non-balancer address",
            ));
        }

        let subchannels = start_subchannels(&backends, is_secure, &self.sync)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectivityState;
    use crate::client::name_resolution::HostAddress;

    fn policy() -> RoundRobinPolicy {
        RoundRobinPolicy::new(Arc::new(SynchronizationContext::default()))
    }

    fn resolution(hosts: &[&str]) -> ResolutionResult {
        ResolutionResult::new(
            hosts
                .iter()
                .map(|h| HostAddress::new(*h, Some(50051)))
                .collect(),
        )
    }

    fn picked_host(result: PickResult) -> String {
        match result {
            PickResult::Ready(sc) => sc.host().to_string(),
            other => panic!("expected ready pick, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_in_address_order() {
        let policy = policy();
        policy
            .create_subchannels(resolution(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]), "svc", false)
            .await
            .unwrap();

        let picks: Vec<String> = (0..6).map(|_| picked_host(policy.pick())).collect();
        assert_eq!(
            picks,
            ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_backend_address() {
        let policy = policy();
        let only_balancers =
            ResolutionResult::new(vec![HostAddress::balancer("lb.svc", 9000, 0, 0)]);
        let err = policy
            .create_subchannels(only_balancers, "svc", false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(matches!(policy.pick(), PickResult::Queue));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_subchannel_set() {
        let policy = policy();
        policy
            .create_subchannels(resolution(&["10.0.0.1", "10.0.0.2"]), "svc", false)
            .await
            .unwrap();
        let old = match policy.pick() {
            PickResult::Ready(sc) => sc,
            other => panic!("expected ready pick, got {other:?}"),
        };

        policy
            .create_subchannels(resolution(&["10.0.1.1"]), "svc", false)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(old.state(), ConnectivityState::Shutdown);
        assert_eq!(picked_host(policy.pick()), "10.0.1.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_then_pick_queues() {
        let policy = policy();
        policy
            .create_subchannels(resolution(&["10.0.0.1"]), "svc", false)
            .await
            .unwrap();
        policy.shutdown();
        policy.shutdown();
        assert!(matches!(policy.pick(), PickResult::Queue));
    }
}
