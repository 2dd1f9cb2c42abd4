//! Client interface through which callers fetch and watch xDS resources.
//!
//! [`XdsClient`] is a cheap-to-clone handle to a background worker that
//! owns the ADS stream. The worker tracks subscriptions per resource
//! type, drives the ACK/NACK protocol, caches validated resources by
//! name, and fans updates out to watchers.
//!
//! There is no automatic reconnect: when the stream terminates, every
//! pending request and watcher receives an error and the client is done.
//! Callers that want a fresh stream build a fresh client, typically
//! through the [`pool`](crate::client::pool).

use crate::client::ads::AdsStream;
use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DiscoveryResponse, Node};
use crate::resource::{
    ClusterUpdate, EndpointUpdate, ListenerUpdate, ResourceType, RouteUpdate, decode_cluster,
    decode_endpoints, decode_listener, decode_route_configuration,
};
use crate::transport::{Transport, TransportStream};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

pub mod ads;
pub mod pool;

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

/// A batch of validated resources of one type.
#[derive(Debug, Clone)]
pub enum XdsUpdate {
    /// CDS resources.
    Clusters(Vec<ClusterUpdate>),
    /// EDS resources.
    Endpoints(Vec<EndpointUpdate>),
    /// LDS resources.
    Listeners(Vec<ListenerUpdate>),
    /// RDS resources.
    Routes(Vec<RouteUpdate>),
}

impl XdsUpdate {
    fn resource_type(&self) -> ResourceType {
        match self {
            XdsUpdate::Clusters(_) => ResourceType::Cluster,
            XdsUpdate::Endpoints(_) => ResourceType::ClusterLoadAssignment,
            XdsUpdate::Listeners(_) => ResourceType::Listener,
            XdsUpdate::Routes(_) => ResourceType::RouteConfiguration,
        }
    }
}

/// One cached, validated resource.
#[derive(Debug, Clone)]
enum CachedResource {
    Cluster(ClusterUpdate),
    Endpoints(EndpointUpdate),
    Listener(ListenerUpdate),
    Route(RouteUpdate),
}

/// A pending one-shot fetch, fulfilled by the next response of its type.
enum PendingGet {
    Clusters(oneshot::Sender<Result<Vec<ClusterUpdate>>>),
    Cluster {
        name: String,
        reply: oneshot::Sender<Result<ClusterUpdate>>,
    },
    Endpoints {
        name: String,
        reply: oneshot::Sender<Result<EndpointUpdate>>,
    },
    Listener {
        name: String,
        reply: oneshot::Sender<Result<ListenerUpdate>>,
    },
    RouteConfig {
        name: String,
        reply: oneshot::Sender<Result<RouteUpdate>>,
    },
}

enum WorkerCommand {
    Get {
        resource_type: ResourceType,
        names: Vec<String>,
        pending: PendingGet,
    },
    Watch {
        resource_type: ResourceType,
        names: Vec<String>,
        watcher_id: WatcherId,
        event_tx: mpsc::UnboundedSender<Result<XdsUpdate>>,
    },
    Unwatch {
        watcher_id: WatcherId,
    },
    Close,
}

/// The xDS client.
///
/// This is a handle to the background worker that manages the ADS stream.
/// Cloning this handle creates a new reference to the same worker. When
/// all handles are dropped the worker shuts down.
#[derive(Clone, Debug)]
pub struct XdsClient {
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
    next_watcher_id: Arc<AtomicU64>,
}

impl XdsClient {
    /// Creates a client and spawns its background worker.
    ///
    /// The worker connects lazily: the stream is opened when the first
    /// fetch or watch arrives, so constructing a client is synchronous
    /// and infallible. Connection errors surface on the first operation.
    pub fn new<T, C>(transport: T, codec: C, node: Node) -> Self
    where
        T: Transport,
        C: XdsCodec,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = AdsWorker {
            command_rx,
            types: HashMap::new(),
        };
        tokio::spawn(worker.run(transport, codec, node));
        Self {
            command_tx,
            next_watcher_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fetches all clusters via a wildcard CDS subscription.
    pub async fn clusters(&self) -> Result<Vec<ClusterUpdate>> {
        let (reply, rx) = oneshot::channel();
        self.get(ResourceType::Cluster, vec![], PendingGet::Clusters(reply))?;
        rx.await.map_err(|_| Error::StreamClosed)?
    }

    /// Fetches a single cluster by name.
    pub async fn cluster(&self, name: impl Into<String>) -> Result<ClusterUpdate> {
        let name = name.into();
        let (reply, rx) = oneshot::channel();
        self.get(
            ResourceType::Cluster,
            vec![name.clone()],
            PendingGet::Cluster { name, reply },
        )?;
        rx.await.map_err(|_| Error::StreamClosed)?
    }

    /// Fetches the endpoint assignment for a cluster or EDS service name.
    pub async fn endpoints(&self, name: impl Into<String>) -> Result<EndpointUpdate> {
        let name = name.into();
        let (reply, rx) = oneshot::channel();
        self.get(
            ResourceType::ClusterLoadAssignment,
            vec![name.clone()],
            PendingGet::Endpoints { name, reply },
        )?;
        rx.await.map_err(|_| Error::StreamClosed)?
    }

    /// Fetches the listener for a target authority.
    pub async fn listener(&self, name: impl Into<String>) -> Result<ListenerUpdate> {
        let name = name.into();
        let (reply, rx) = oneshot::channel();
        self.get(
            ResourceType::Listener,
            vec![name.clone()],
            PendingGet::Listener { name, reply },
        )?;
        rx.await.map_err(|_| Error::StreamClosed)?
    }

    /// Fetches a route configuration by name.
    pub async fn route_config(&self, name: impl Into<String>) -> Result<RouteUpdate> {
        let name = name.into();
        let (reply, rx) = oneshot::channel();
        self.get(
            ResourceType::RouteConfiguration,
            vec![name.clone()],
            PendingGet::RouteConfig { name, reply },
        )?;
        rx.await.map_err(|_| Error::StreamClosed)?
    }

    /// Subscribes to ongoing updates for a resource type.
    ///
    /// An empty `names` list is a wildcard subscription. Dropping the
    /// returned watch unsubscribes.
    pub fn watch(&self, resource_type: ResourceType, names: Vec<String>) -> ResourceWatch {
        let watcher_id = WatcherId(self.next_watcher_id.fetch_add(1, Ordering::Relaxed));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = self.command_tx.send(WorkerCommand::Watch {
            resource_type,
            names,
            watcher_id,
            event_tx,
        });
        ResourceWatch {
            watcher_id,
            event_rx,
            command_tx: self.command_tx.clone(),
        }
    }

    /// Shuts down the worker and the ADS stream. Safe to call more than
    /// once; later operations fail with [`Error::StreamClosed`].
    pub fn close(&self) {
        let _ = self.command_tx.send(WorkerCommand::Close);
    }

    /// True when both handles drive the same background worker.
    pub fn same_worker(&self, other: &XdsClient) -> bool {
        self.command_tx.same_channel(&other.command_tx)
    }

    fn get(
        &self,
        resource_type: ResourceType,
        names: Vec<String>,
        pending: PendingGet,
    ) -> Result<()> {
        self.command_tx
            .send(WorkerCommand::Get {
                resource_type,
                names,
                pending,
            })
            .map_err(|_| Error::StreamClosed)
    }
}

/// A subscription to updates of one resource type.
///
/// Dropping the watch unsubscribes.
#[derive(Debug)]
pub struct ResourceWatch {
    watcher_id: WatcherId,
    event_rx: mpsc::UnboundedReceiver<Result<XdsUpdate>>,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl ResourceWatch {
    /// Waits for the next update or error. `None` means the client shut
    /// down.
    pub async fn next(&mut self) -> Option<Result<XdsUpdate>> {
        self.event_rx.recv().await
    }
}

impl Drop for ResourceWatch {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Unwatch {
            watcher_id: self.watcher_id,
        });
    }
}

struct WatcherEntry {
    names: HashSet<String>,
    wildcard: bool,
    event_tx: mpsc::UnboundedSender<Result<XdsUpdate>>,
}

/// Per resource-type subscription state.
#[derive(Default)]
struct TypeState {
    /// Names requested so far; irrelevant while `wildcard` is set.
    names: HashSet<String>,
    wildcard: bool,
    pending: Vec<PendingGet>,
    watchers: HashMap<WatcherId, WatcherEntry>,
    /// Validated resources by name, from the latest accepted response.
    cache: HashMap<String, CachedResource>,
    /// Set once a response for this type has been accepted. From then
    /// on the cache reflects the server's full answer for the current
    /// subscription; a subscribed name absent from it does not exist.
    synced: bool,
}

impl TypeState {
    fn subscribe(&mut self, names: &[String]) -> bool {
        if names.is_empty() {
            let changed = !self.wildcard;
            self.wildcard = true;
            changed
        } else {
            let mut changed = false;
            for name in names {
                changed |= self.names.insert(name.clone());
            }
            changed && !self.wildcard
        }
    }

    fn request_names(&self) -> Vec<String> {
        if self.wildcard {
            Vec::new()
        } else {
            self.names.iter().cloned().collect()
        }
    }

    fn has_interest(&self) -> bool {
        self.wildcard || !self.names.is_empty()
    }
}

struct AdsWorker {
    command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    types: HashMap<ResourceType, TypeState>,
}

impl AdsWorker {
    async fn run<T, C>(mut self, transport: T, codec: C, node: Node)
    where
        T: Transport,
        C: XdsCodec,
    {
        // Wait for the first subscription before connecting; there is
        // nothing useful to say to the server until then.
        while !self.types.values().any(TypeState::has_interest) {
            match self.command_rx.recv().await {
                Some(WorkerCommand::Close) | None => return,
                Some(command) => {
                    self.apply_command(command);
                }
            }
        }

        let initial: Vec<(ResourceType, Vec<String>)> = self
            .types
            .iter()
            .filter(|(_, state)| state.has_interest())
            .map(|(resource_type, state)| (*resource_type, state.request_names()))
            .collect();

        let mut ads = match AdsStream::connect(&transport, codec, node, &initial).await {
            Ok(ads) => ads,
            Err(error) => {
                tracing::warn!(%error, "failed to open ADS stream");
                self.fail_all(&error);
                return;
            }
        };

        let result = self.run_connected(&mut ads).await;
        ads.close();
        if let Err(error) = result {
            tracing::warn!(%error, "ADS stream terminated");
            self.fail_all(&error);
        }
    }

    /// Runs the connected event loop. `Ok(())` means a clean shutdown;
    /// any error disposes the client.
    async fn run_connected<S, C>(&mut self, ads: &mut AdsStream<S, C>) -> Result<()>
    where
        S: TransportStream,
        C: XdsCodec,
    {
        loop {
            tokio::select! {
                response = ads.recv() => {
                    match response? {
                        Some((resource_type, response)) => {
                            self.handle_response(ads, resource_type, response).await?;
                        }
                        None => return Err(Error::StreamClosed),
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(WorkerCommand::Close) | None => return Ok(()),
                        Some(command) => {
                            if let Some(resource_type) = self.apply_command(command) {
                                self.send_request(ads, resource_type).await?;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Applies a command to the subscription state. Returns the resource
    /// type to re-request when the command grew the subscription; cache
    /// hits and already-covered names do not.
    fn apply_command(&mut self, command: WorkerCommand) -> Option<ResourceType> {
        match command {
            WorkerCommand::Get {
                resource_type,
                names,
                pending,
            } => {
                let state = self.types.entry(resource_type).or_default();
                let changed = state.subscribe(&names);
                // Serve named fetches from cache when possible.
                if let Some(pending) = Self::try_cached_reply(state, pending) {
                    if !changed && state.synced {
                        // The subscription did not grow, so the server
                        // will send nothing new; answer from what the
                        // last accepted response established.
                        Self::reply_from_synced_state(state, pending);
                    } else {
                        state.pending.push(pending);
                    }
                }
                changed.then_some(resource_type)
            }
            WorkerCommand::Watch {
                resource_type,
                names,
                watcher_id,
                event_tx,
            } => {
                let state = self.types.entry(resource_type).or_default();
                let changed = state.subscribe(&names);
                state.watchers.insert(
                    watcher_id,
                    WatcherEntry {
                        wildcard: names.is_empty(),
                        names: names.into_iter().collect(),
                        event_tx,
                    },
                );
                changed.then_some(resource_type)
            }
            WorkerCommand::Unwatch { watcher_id } => {
                for state in self.types.values_mut() {
                    state.watchers.remove(&watcher_id);
                }
                None
            }
            WorkerCommand::Close => None,
        }
    }

    /// Answers a fetch that cannot wait for the server: the subscription
    /// is unchanged and a response was already accepted. A named resource
    /// absent from the cache does not exist; a wildcard fetch gets the
    /// cached set.
    fn reply_from_synced_state(state: &TypeState, pending: PendingGet) {
        match pending {
            PendingGet::Clusters(reply) => {
                let updates = state
                    .cache
                    .values()
                    .filter_map(|cached| match cached {
                        CachedResource::Cluster(update) => Some(update.clone()),
                        _ => None,
                    })
                    .collect();
                let _ = reply.send(Ok(updates));
            }
            PendingGet::Cluster { name, reply } => {
                let _ = reply.send(Err(Error::DoesNotExist(name)));
            }
            PendingGet::Endpoints { name, reply } => {
                let _ = reply.send(Err(Error::DoesNotExist(name)));
            }
            PendingGet::Listener { name, reply } => {
                let _ = reply.send(Err(Error::DoesNotExist(name)));
            }
            PendingGet::RouteConfig { name, reply } => {
                let _ = reply.send(Err(Error::DoesNotExist(name)));
            }
        }
    }

    /// Fulfills a fetch from cache if the named resource is present.
    /// Returns the pending fetch back when it has to wait.
    fn try_cached_reply(state: &mut TypeState, pending: PendingGet) -> Option<PendingGet> {
        match pending {
            PendingGet::Cluster { name, reply } => {
                if let Some(CachedResource::Cluster(update)) = state.cache.get(&name) {
                    let _ = reply.send(Ok(update.clone()));
                    None
                } else {
                    Some(PendingGet::Cluster { name, reply })
                }
            }
            PendingGet::Endpoints { name, reply } => {
                if let Some(CachedResource::Endpoints(update)) = state.cache.get(&name) {
                    let _ = reply.send(Ok(update.clone()));
                    None
                } else {
                    Some(PendingGet::Endpoints { name, reply })
                }
            }
            PendingGet::Listener { name, reply } => {
                if let Some(CachedResource::Listener(update)) = state.cache.get(&name) {
                    let _ = reply.send(Ok(update.clone()));
                    None
                } else {
                    Some(PendingGet::Listener { name, reply })
                }
            }
            PendingGet::RouteConfig { name, reply } => {
                if let Some(CachedResource::Route(update)) = state.cache.get(&name) {
                    let _ = reply.send(Ok(update.clone()));
                    None
                } else {
                    Some(PendingGet::RouteConfig { name, reply })
                }
            }
            // Wildcard fetches always wait for the next response.
            other => Some(other),
        }
    }

    async fn send_request<S, C>(
        &mut self,
        ads: &mut AdsStream<S, C>,
        resource_type: ResourceType,
    ) -> Result<()>
    where
        S: TransportStream,
        C: XdsCodec,
    {
        let names = match self.types.get(&resource_type) {
            Some(state) => state.request_names(),
            None => return Ok(()),
        };
        ads.send_request(resource_type, &names).await
    }

    async fn handle_response<S, C>(
        &mut self,
        ads: &mut AdsStream<S, C>,
        resource_type: ResourceType,
        response: DiscoveryResponse,
    ) -> Result<()>
    where
        S: TransportStream,
        C: XdsCodec,
    {
        let mut errors: Vec<String> = Vec::new();
        let update = match resource_type {
            ResourceType::Cluster => {
                let mut updates = Vec::new();
                for resource in &response.resources {
                    match decode_cluster(resource) {
                        Ok(update) => updates.push(update),
                        Err(e) => errors.push(e.to_string()),
                    }
                }
                XdsUpdate::Clusters(updates)
            }
            ResourceType::ClusterLoadAssignment => {
                let mut updates = Vec::new();
                for resource in &response.resources {
                    match decode_endpoints(resource) {
                        Ok(update) => updates.push(update),
                        Err(e) => errors.push(e.to_string()),
                    }
                }
                XdsUpdate::Endpoints(updates)
            }
            ResourceType::Listener => {
                let mut updates = Vec::new();
                for resource in &response.resources {
                    match decode_listener(resource) {
                        Ok(update) => updates.push(update),
                        Err(e) => errors.push(e.to_string()),
                    }
                }
                XdsUpdate::Listeners(updates)
            }
            ResourceType::RouteConfiguration => {
                let mut updates = Vec::new();
                for resource in &response.resources {
                    match decode_route_configuration(resource) {
                        Ok(update) => updates.push(update),
                        Err(e) => errors.push(e.to_string()),
                    }
                }
                XdsUpdate::Routes(updates)
            }
        };

        let names = self
            .types
            .get(&resource_type)
            .map(TypeState::request_names)
            .unwrap_or_default();

        if errors.is_empty() {
            tracing::debug!(
                %resource_type,
                version = %response.version_info,
                "accepting discovery response"
            );
            ads.send_ack(resource_type, &names, &response.version_info)
                .await?;
            self.accept_update(resource_type, update);
        } else {
            let message = errors.join("; ");
            tracing::warn!(%resource_type, %message, "rejecting discovery response");
            ads.send_nack(resource_type, &names, &message).await?;
            self.reject_update(resource_type, &Error::Validation(message));
        }
        Ok(())
    }

    /// Caches validated resources, fulfills pending fetches and notifies
    /// watchers.
    fn accept_update(&mut self, resource_type: ResourceType, update: XdsUpdate) {
        debug_assert_eq!(update.resource_type(), resource_type);
        let Some(state) = self.types.get_mut(&resource_type) else {
            return;
        };
        state.synced = true;

        match &update {
            XdsUpdate::Clusters(updates) => {
                for u in updates {
                    state
                        .cache
                        .insert(u.cluster_name.clone(), CachedResource::Cluster(u.clone()));
                }
            }
            XdsUpdate::Endpoints(updates) => {
                for u in updates {
                    state
                        .cache
                        .insert(u.cluster_name.clone(), CachedResource::Endpoints(u.clone()));
                }
            }
            XdsUpdate::Listeners(updates) => {
                for u in updates {
                    state
                        .cache
                        .insert(u.name.clone(), CachedResource::Listener(u.clone()));
                }
            }
            XdsUpdate::Routes(updates) => {
                for u in updates {
                    state
                        .cache
                        .insert(u.name.clone(), CachedResource::Route(u.clone()));
                }
            }
        }

        for pending in state.pending.drain(..) {
            match (pending, &update) {
                (PendingGet::Clusters(reply), XdsUpdate::Clusters(updates)) => {
                    let _ = reply.send(Ok(updates.clone()));
                }
                (PendingGet::Cluster { name, reply }, XdsUpdate::Clusters(updates)) => {
                    let found = updates.iter().find(|u| u.cluster_name == name);
                    let _ = reply.send(
                        found
                            .cloned()
                            .ok_or_else(|| Error::DoesNotExist(name.clone())),
                    );
                }
                (PendingGet::Endpoints { name, reply }, XdsUpdate::Endpoints(updates)) => {
                    let found = updates.iter().find(|u| u.cluster_name == name);
                    let _ = reply.send(
                        found
                            .cloned()
                            .ok_or_else(|| Error::DoesNotExist(name.clone())),
                    );
                }
                (PendingGet::Listener { name, reply }, XdsUpdate::Listeners(updates)) => {
                    let found = updates.iter().find(|u| u.name == name);
                    let _ = reply.send(
                        found
                            .cloned()
                            .ok_or_else(|| Error::DoesNotExist(name.clone())),
                    );
                }
                (PendingGet::RouteConfig { name, reply }, XdsUpdate::Routes(updates)) => {
                    let found = updates.iter().find(|u| u.name == name);
                    let _ = reply.send(
                        found
                            .cloned()
                            .ok_or_else(|| Error::DoesNotExist(name.clone())),
                    );
                }
                // Mismatched pending kinds cannot happen: pendings are
                // stored under the type they were created for.
                _ => {}
            }
        }

        state.watchers.retain(|_, watcher| {
            if !watcher_interested(watcher, &update) {
                return true;
            }
            watcher.event_tx.send(Ok(update.clone())).is_ok()
        });
    }

    /// Fails pending fetches and notifies watchers after a NACK.
    fn reject_update(&mut self, resource_type: ResourceType, error: &Error) {
        let Some(state) = self.types.get_mut(&resource_type) else {
            return;
        };
        for pending in state.pending.drain(..) {
            fail_pending(pending, error);
        }
        state
            .watchers
            .retain(|_, watcher| watcher.event_tx.send(Err(error.duplicate())).is_ok());
    }

    /// Fails everything, everywhere. Used when the stream is gone.
    fn fail_all(&mut self, error: &Error) {
        for state in self.types.values_mut() {
            for pending in state.pending.drain(..) {
                fail_pending(pending, error);
            }
            for watcher in state.watchers.values() {
                let _ = watcher.event_tx.send(Err(error.duplicate()));
            }
            state.watchers.clear();
        }
    }
}

fn watcher_interested(watcher: &WatcherEntry, update: &XdsUpdate) -> bool {
    if watcher.wildcard {
        return true;
    }
    match update {
        XdsUpdate::Clusters(updates) => updates
            .iter()
            .any(|u| watcher.names.contains(&u.cluster_name)),
        XdsUpdate::Endpoints(updates) => updates
            .iter()
            .any(|u| watcher.names.contains(&u.cluster_name)),
        XdsUpdate::Listeners(updates) => {
            updates.iter().any(|u| watcher.names.contains(&u.name))
        }
        XdsUpdate::Routes(updates) => updates.iter().any(|u| watcher.names.contains(&u.name)),
    }
}

fn fail_pending(pending: PendingGet, error: &Error) {
    match pending {
        PendingGet::Clusters(reply) => {
            let _ = reply.send(Err(error.duplicate()));
        }
        PendingGet::Cluster { reply, .. } => {
            let _ = reply.send(Err(error.duplicate()));
        }
        PendingGet::Endpoints { reply, .. } => {
            let _ = reply.send(Err(error.duplicate()));
        }
        PendingGet::Listener { reply, .. } => {
            let _ = reply.send(Err(error.duplicate()));
        }
        PendingGet::RouteConfig { reply, .. } => {
            let _ = reply.send(Err(error.duplicate()));
        }
    }
}
