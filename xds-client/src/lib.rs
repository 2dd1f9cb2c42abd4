//! An [xDS](https://www.envoyproxy.io/docs/envoy/latest/api-docs/xds_protocol)
//! discovery client for meshbal channels.
//!
//! This crate speaks the aggregated discovery (ADS) protocol to a
//! management server. It handles:
//! - ADS stream management over a pluggable transport
//! - Resource fetching and watching with per-type version/nonce tracking
//! - ACK/NACK of discovery responses, with validation errors echoed back
//! - Bootstrap configuration and node identity
//! - Reference-counted client sharing across channels
//!
//! It does NOT decide how discovered clusters and endpoints are used;
//! the `meshbal` crate layers load balancing policies on top.
//!
//! # Example
//!
//! ```ignore
//! use meshbal_xds::{BootstrapInfo, ProstCodec, TonicTransport, XdsClient};
//!
//! let bootstrap = BootstrapInfo::from_env()?;
//! let transport = TonicTransport::connect_server(bootstrap.primary_server()).await?;
//! let client = XdsClient::new(transport, ProstCodec, bootstrap.node.clone());
//!
//! let cluster = client.cluster("my-cluster").await?;
//! let endpoints = client.endpoints(cluster.endpoint_resource_name()).await?;
//! ```

pub mod bootstrap;
pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod resource;
pub mod transport;

pub use bootstrap::{
    BOOTSTRAP_ENV_VAR, BootstrapInfo, CLIENT_FEATURE_NO_OVERPROVISIONING, ChannelCreds,
    ServerConfig,
};
pub use client::pool::{ClientFactory, XdsClientPool};
pub use client::{ResourceWatch, WatcherId, XdsClient, XdsUpdate};
pub use codec::XdsCodec;
pub use codec::prost::ProstCodec;
pub use error::{Error, Result};
pub use message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Locality, Node, ResourceAny};
pub use resource::{
    ClusterUpdate, DropOverload, Endpoint, EndpointHealth, EndpointUpdate, ListenerUpdate,
    LocalityEndpoints, ResourceType, RouteUpdate,
};
pub use transport::tonic::TonicTransport;
pub use transport::{Transport, TransportStream};
