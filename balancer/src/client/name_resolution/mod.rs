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

//! Name resolution: turning a target URI into addresses and config.
//!
//! A [`Resolver`] handles one URI scheme and produces a
//! [`ResolutionResult`]: the backend addresses, an optional service config
//! (or the error that prevented obtaining one), and an attribute bag for
//! out-of-band context between resolver and policy. Resolvers are looked
//! up through a [`registry::ResolverRegistry`] owned by the channel.

#[cfg(feature = "dns")]
pub mod dns;
pub mod registry;
pub mod statik;
pub mod xds;

use crate::attributes::Attributes;
use crate::client::backoff::ExponentialBackoff;
use crate::client::service_config::ServiceConfig;
use crate::sync::{ScheduledHandle, SynchronizationContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tonic::Status;
use url::Url;

/// One address produced by name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    pub host: String,
    /// Port, if the resolver knows it. Absent means "use the scheme
    /// default" (443 for secure targets, 80 otherwise).
    pub port: Option<u16>,
    /// True for addresses discovered through a balancer SRV record; such
    /// addresses point at a lookaside balancer, not a backend.
    pub is_load_balancer: bool,
    pub priority: u16,
    pub weight: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            is_load_balancer: false,
            priority: 0,
            weight: 0,
        }
    }

    pub fn balancer(host: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            is_load_balancer: true,
            priority,
            weight,
        }
    }

    /// The port to dial, falling back to the scheme default.
    pub fn port_or_default(&self, is_secure: bool) -> u16 {
        self.port.unwrap_or(if is_secure { 443 } else { 80 })
    }
}

/// The outcome of one resolution pass.
#[derive(Debug)]
pub struct ResolutionResult {
    pub addresses: Vec<HostAddress>,
    /// The service config carried by the resolution, None when the
    /// resolver has none to offer, or the error hit while obtaining it.
    pub service_config: Result<Option<ServiceConfig>, Status>,
    pub attributes: Attributes,
}

impl ResolutionResult {
    pub fn new(addresses: Vec<HostAddress>) -> Self {
        Self {
            addresses,
            service_config: Ok(None),
            attributes: Attributes::new(),
        }
    }

    pub fn with_service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = Ok(Some(config));
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A parsed target URI, e.g. `dns://my-service:50051`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Target {
    pub fn parse(target: &str) -> Result<Self, Status> {
        let url = Url::parse(target)
            .map_err(|e| Status::invalid_argument(format!("invalid target {target}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Status::invalid_argument(format!("target {target} has no host")))?;
        Ok(Target {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_string(),
            port: url.port(),
        })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// A name resolver for one URI scheme.
#[tonic::async_trait]
pub trait Resolver: Send + Sync {
    /// The URI scheme this resolver handles, lowercase.
    fn scheme(&self) -> &str;

    /// Resolves the target into addresses and config. Called again on
    /// refresh; each call is an independent resolution pass.
    async fn resolve(&self, target: &Target) -> Result<ResolutionResult, Status>;
}

/// Receives the results of a [`ResolutionWatcher`]'s resolution passes.
pub trait ResolutionObserver: Send + Sync {
    fn on_result(&self, result: ResolutionResult);
    fn on_error(&self, status: Status);
}

/// Drives repeated resolution of one target.
///
/// A failed pass is reported to the observer and schedules exactly one
/// backoff retry; further failures reported while that retry is pending
/// do not schedule another. A successful pass resets the backoff.
pub struct ResolutionWatcher {
    resolver: Arc<dyn Resolver>,
    target: Target,
    observer: Arc<dyn ResolutionObserver>,
    sync: Arc<SynchronizationContext>,
    backoff: Mutex<ExponentialBackoff>,
    pending_retry: Mutex<Option<ScheduledHandle>>,
    shutdown: AtomicBool,
}

impl ResolutionWatcher {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        target: Target,
        observer: Arc<dyn ResolutionObserver>,
        sync: Arc<SynchronizationContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            target,
            observer,
            sync,
            backoff: Mutex::new(ExponentialBackoff::standard()),
            pending_retry: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Starts a resolution pass on a background task.
    pub fn resolve_now(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.resolver.resolve(&this.target).await {
                Ok(result) => {
                    this.backoff.lock().unwrap().reset();
                    this.observer.on_result(result);
                }
                Err(status) => this.resolution_failed(status),
            }
        });
    }

    fn resolution_failed(self: &Arc<Self>, status: Status) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        self.observer.on_error(status.clone());

        let mut pending = self.pending_retry.lock().unwrap();
        if pending.is_some() {
            // A retry is already on its way; this error rides along.
            return;
        }
        let delay = self.backoff.lock().unwrap().backoff_duration();
        tracing::warn!(
            target = %self.target,
            error = %status,
            retry_in = ?delay,
            "name resolution failed"
        );
        let this = Arc::clone(self);
        *pending = Some(self.sync.schedule(delay, move || {
            this.pending_retry.lock().unwrap().take();
            this.resolve_now();
        }));
    }

    /// Stops the watcher and cancels any pending retry. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(timer) = self.pending_retry.lock().unwrap().take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FlakyResolver {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[tonic::async_trait]
    impl Resolver for FlakyResolver {
        fn scheme(&self) -> &str {
            "flaky"
        }

        async fn resolve(&self, target: &Target) -> Result<ResolutionResult, Status> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(Status::unavailable("dns down"));
            }
            Ok(ResolutionResult::new(vec![HostAddress::new(
                target.host.clone(),
                target.port,
            )]))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        results: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ResolutionObserver for RecordingObserver {
        fn on_result(&self, _result: ResolutionResult) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _status: Status) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn watcher(
        resolver: Arc<dyn Resolver>,
        observer: Arc<RecordingObserver>,
    ) -> Arc<ResolutionWatcher> {
        ResolutionWatcher::new(
            resolver,
            Target::parse("flaky://svc:50051").unwrap(),
            observer,
            Arc::new(SynchronizationContext::default()),
        )
    }

    #[test]
    fn test_target_parsing() {
        let target = Target::parse("dns://my-service:80").unwrap();
        assert_eq!(target.scheme, "dns");
        assert_eq!(target.host, "my-service");
        assert_eq!(target.port, Some(80));

        let target = Target::parse("xds://cluster-a").unwrap();
        assert_eq!(target.port, None);

        assert!(Target::parse("not a uri").is_err());
    }

    #[test]
    fn test_default_ports() {
        let addr = HostAddress::new("svc", None);
        assert_eq!(addr.port_or_default(true), 443);
        assert_eq!(addr.port_or_default(false), 80);
        let addr = HostAddress::new("svc", Some(50051));
        assert_eq!(addr.port_or_default(true), 50051);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_schedules_single_retry() {
        let resolver = Arc::new(FlakyResolver {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let observer = Arc::new(RecordingObserver::default());
        let watcher = watcher(resolver.clone(), observer.clone());

        // Two passes fail back to back; only one retry may be pending.
        watcher.resolve_now();
        watcher.resolve_now();
        tokio::task::yield_now().await;
        assert!(observer.errors.load(Ordering::SeqCst) >= 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(observer.results.load(Ordering::SeqCst), 1);
        // Initial two passes plus exactly one retry.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_retry() {
        let resolver = Arc::new(FlakyResolver {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        });
        let observer = Arc::new(RecordingObserver::default());
        let watcher = watcher(resolver.clone(), observer.clone());

        watcher.resolve_now();
        tokio::task::yield_now().await;
        watcher.shutdown();
        watcher.shutdown();

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
