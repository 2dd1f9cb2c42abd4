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

//! The grpclb policy: membership streamed from a lookaside balancer.
//!
//! The policy opens a duplex stream to the first balancer-flagged
//! address, introduces itself with an initial request, and then follows
//! the balancer's lead: server lists replace the active pool, a fallback
//! signal switches to the resolver-supplied backend addresses. If the
//! balancer asks for client stats, a periodic reporter sends aggregate
//! call counters over the same stream.

use crate::client::load_balancing::picker::{PickResult, Picker, RoundRobinPicker};
use crate::client::load_balancing::{
    LbPolicy, backend_addresses, check_service_name, shutdown_all, start_subchannels,
};
use crate::client::name_resolution::{HostAddress, ResolutionResult};
use crate::client::subchannel::Subchannel;
use crate::sync::SynchronizationContext;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tonic::Status;

/// One backend in a balancer-provided server list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BalancerServer {
    pub address: String,
    pub port: u16,
    pub load_balance_token: String,
}

/// Aggregate call counters reported back to the balancer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub num_calls_started: u64,
    pub num_calls_finished: u64,
}

/// Client-to-balancer messages.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadBalanceRequest {
    Initial { name: String },
    ClientStats(ClientStats),
}

/// Balancer-to-client messages.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadBalanceResponse {
    Initial {
        client_stats_report_interval: Duration,
    },
    ServerList(Vec<BalancerServer>),
    Fallback,
}

/// A duplex stream to one balancer.
#[tonic::async_trait]
pub trait BalancerStream: Send {
    async fn send(&mut self, request: LoadBalanceRequest) -> Result<(), Status>;

    /// The next balancer message, or None when the balancer closed the
    /// stream.
    async fn recv(&mut self) -> Result<Option<LoadBalanceResponse>, Status>;
}

/// Opens balancer streams. The production implementation dials the
/// balancer address over the channel's transport; tests script one.
#[tonic::async_trait]
pub trait BalancerConnector: Send + Sync {
    async fn connect(&self, address: &HostAddress)
    -> Result<Box<dyn BalancerStream>, Status>;
}

#[derive(Default)]
struct CallCounters {
    started: AtomicU64,
    finished: AtomicU64,
}

impl CallCounters {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            num_calls_started: self.started.load(Ordering::Relaxed),
            num_calls_finished: self.finished.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    fallback_addresses: Vec<HostAddress>,
    is_secure: bool,
    subchannels: Vec<Arc<Subchannel>>,
    picker: Option<RoundRobinPicker>,
    server_list_hash: Option<u64>,
    in_fallback: bool,
    last_error: Option<Status>,
    shut_down: bool,
}

pub struct GrpclbPolicy {
    sync: Arc<SynchronizationContext>,
    connector: Arc<dyn BalancerConnector>,
    inner: Arc<Mutex<Inner>>,
    counters: Arc<CallCounters>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GrpclbPolicy {
    pub fn new(sync: Arc<SynchronizationContext>, connector: Arc<dyn BalancerConnector>) -> Self {
        Self {
            sync,
            connector,
            inner: Arc::new(Mutex::new(Inner {
                fallback_addresses: Vec::new(),
                is_secure: false,
                subchannels: Vec::new(),
                picker: None,
                server_list_hash: None,
                in_fallback: false,
                last_error: None,
                shut_down: false,
            })),
            counters: Arc::new(CallCounters::default()),
            shutdown_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Records a finished call for the next stats report.
    pub fn call_finished(&self) {
        self.counters.finished.fetch_add(1, Ordering::Relaxed);
    }

    fn stop_worker(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn swap_pool(
        inner: &mut Inner,
        subchannels: Vec<Arc<Subchannel>>,
        picker: RoundRobinPicker,
        in_fallback: bool,
    ) {
        let previous = std::mem::replace(&mut inner.subchannels, subchannels);
        inner.picker = Some(picker);
        inner.in_fallback = in_fallback;
        inner.last_error = None;
        shutdown_all(&previous);
    }

    fn apply_server_list(
        inner: &Arc<Mutex<Inner>>,
        sync: &Arc<SynchronizationContext>,
        servers: Vec<BalancerServer>,
    ) {
        let mut hasher = DefaultHasher::new();
        servers.hash(&mut hasher);
        let hash = hasher.finish();

        let mut inner = inner.lock().unwrap();
        if inner.shut_down {
            return;
        }
        if !inner.in_fallback && inner.server_list_hash == Some(hash) {
            tracing::debug!("server list unchanged, keeping current subchannels");
            return;
        }

        let addresses: Vec<HostAddress> = servers
            .iter()
            .map(|s| HostAddress::new(s.address.clone(), Some(s.port)))
            .collect();
        let is_secure = inner.is_secure;
        match start_subchannels(&addresses, is_secure, sync)
            .and_then(|subchannels| Ok((RoundRobinPicker::new(subchannels.clone())?, subchannels)))
        {
            Ok((picker, subchannels)) => {
                inner.server_list_hash = Some(hash);
                Self::swap_pool(&mut inner, subchannels, picker, false);
            }
            Err(status) => {
                tracing::warn!(error = %status, "could not apply balancer server list");
                inner.last_error = Some(status);
            }
        }
    }

    fn enter_fallback(inner: &Arc<Mutex<Inner>>, sync: &Arc<SynchronizationContext>) {
        let mut inner = inner.lock().unwrap();
        if inner.shut_down || inner.in_fallback {
            return;
        }
        tracing::info!("balancer requested fallback to resolver-supplied addresses");
        let addresses = inner.fallback_addresses.clone();
        let is_secure = inner.is_secure;
        match start_subchannels(&addresses, is_secure, sync)
            .and_then(|subchannels| Ok((RoundRobinPicker::new(subchannels.clone())?, subchannels)))
        {
            Ok((picker, subchannels)) => {
                inner.server_list_hash = None;
                Self::swap_pool(&mut inner, subchannels, picker, true);
            }
            Err(status) => {
                tracing::warn!(error = %status, "no usable fallback addresses");
                inner.last_error = Some(status);
            }
        }
    }

    async fn run_stream(
        mut stream: Box<dyn BalancerStream>,
        report_interval: Duration,
        inner: Arc<Mutex<Inner>>,
        sync: Arc<SynchronizationContext>,
        counters: Arc<CallCounters>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut reporter = if report_interval > Duration::ZERO {
            Some(tokio::time::interval_at(
                tokio::time::Instant::now() + report_interval,
                report_interval,
            ))
        } else {
            None
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = async {
                    match reporter.as_mut() {
                        Some(reporter) => { reporter.tick().await; }
                        None => std::future::pending().await,
                    }
                } => {
                    let stats = counters.snapshot();
                    if let Err(status) = stream
                        .send(LoadBalanceRequest::ClientStats(stats))
                        .await
                    {
                        tracing::warn!(error = %status, "stats report failed");
                        inner.lock().unwrap().last_error = Some(status);
                        return;
                    }
                }
                response = stream.recv() => match response {
                    Ok(Some(LoadBalanceResponse::ServerList(servers))) => {
                        Self::apply_server_list(&inner, &sync, servers);
                    }
                    Ok(Some(LoadBalanceResponse::Fallback)) => {
                        Self::enter_fallback(&inner, &sync);
                    }
                    Ok(Some(LoadBalanceResponse::Initial { .. })) => {
                        let status = Status::failed_precondition(
                            "balancer sent a second initial response",
                        );
                        tracing::error!("{}", status.message());
                        inner.lock().unwrap().last_error = Some(status);
                        return;
                    }
                    Ok(None) => {
                        let status = Status::unavailable("balancer closed the stream");
                        inner.lock().unwrap().last_error = Some(status);
                        return;
                    }
                    Err(status) => {
                        tracing::warn!(error = %status, "balancer stream failed");
                        inner.lock().unwrap().last_error = Some(status);
                        return;
                    }
                }
            }
        }
    }
}

#[tonic::async_trait]
impl LbPolicy for GrpclbPolicy {
    async fn create_subchannels(
        &self,
        resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status> {
        check_service_name(service_name)?;
        let balancer = resolution
            .addresses
            .iter()
            .find(|a| a.is_load_balancer)
            .cloned()
            .ok_or_else(|| {
                Status::invalid_argument("grpclb requires at least one balancer address")
            })?;
        let fallback = backend_addresses(&resolution);

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.shut_down {
                return Err(Status::failed_precondition("policy is shut down"));
            }
            inner.fallback_addresses = fallback;
            inner.is_secure = is_secure;
        }

        let mut stream = self.connector.connect(&balancer).await?;
        stream
            .send(LoadBalanceRequest::Initial {
                name: service_name.to_string(),
            })
            .await?;
        let report_interval = match stream.recv().await? {
            Some(LoadBalanceResponse::Initial {
                client_stats_report_interval,
            }) => client_stats_report_interval,
            Some(_) => {
                return Err(Status::failed_precondition(
                    "balancer must start with an initial response",
                ));
            }
            None => return Err(Status::unavailable("balancer closed the stream")),
        };

        // Replace any previous stream worker.
        self.stop_worker();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);
        let handle = tokio::spawn(Self::run_stream(
            stream,
            report_interval,
            Arc::clone(&self.inner),
            Arc::clone(&self.sync),
            Arc::clone(&self.counters),
            shutdown_rx,
        ));
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn pick(&self) -> PickResult {
        let inner = self.inner.lock().unwrap();
        if let Some(picker) = &inner.picker {
            if !inner.in_fallback {
                self.counters.started.fetch_add(1, Ordering::Relaxed);
            }
            return picker.pick();
        }
        match &inner.last_error {
            Some(status) => PickResult::Fail(status.clone()),
            None => PickResult::Queue,
        }
    }

    fn shutdown(&self) {
        self.stop_worker();
        let subchannels = {
            let mut inner = self.inner.lock().unwrap();
            inner.shut_down = true;
            inner.picker = None;
            std::mem::take(&mut inner.subchannels)
        };
        shutdown_all(&subchannels);
    }
}
