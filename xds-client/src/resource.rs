//! Typed xDS resources and their validation.
//!
//! The ADS wire protocol carries resources as opaque `google.protobuf.Any`
//! payloads. This module decodes those payloads into crate-owned update
//! types and validates them. A validation failure here is what drives a
//! NACK on the ADS stream.

use crate::error::{Error, Result};
use crate::message::{Locality, ResourceAny};
use prost::Message;

/// Type URL for Listener resources.
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
/// Type URL for RouteConfiguration resources.
pub const ROUTE_CONFIGURATION_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
/// Type URL for Cluster resources.
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
/// Type URL for ClusterLoadAssignment resources.
pub const CLUSTER_LOAD_ASSIGNMENT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

/// Maximum drop rate, expressed in parts per million.
pub const DROP_RATE_CEILING: u32 = 1_000_000;

/// The xDS resource types supported by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// LDS.
    Listener,
    /// RDS.
    RouteConfiguration,
    /// CDS.
    Cluster,
    /// EDS.
    ClusterLoadAssignment,
}

impl ResourceType {
    /// All supported resource types.
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Listener,
        ResourceType::RouteConfiguration,
        ResourceType::Cluster,
        ResourceType::ClusterLoadAssignment,
    ];

    /// The type URL carried in discovery requests and responses.
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::RouteConfiguration => ROUTE_CONFIGURATION_TYPE_URL,
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::ClusterLoadAssignment => CLUSTER_LOAD_ASSIGNMENT_TYPE_URL,
        }
    }

    /// Maps a type URL back to the resource type, if supported.
    pub fn from_type_url(url: &str) -> Option<ResourceType> {
        match url {
            LISTENER_TYPE_URL => Some(ResourceType::Listener),
            ROUTE_CONFIGURATION_TYPE_URL => Some(ResourceType::RouteConfiguration),
            CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
            CLUSTER_LOAD_ASSIGNMENT_TYPE_URL => Some(ResourceType::ClusterLoadAssignment),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceType::Listener => "Listener",
            ResourceType::RouteConfiguration => "RouteConfiguration",
            ResourceType::Cluster => "Cluster",
            ResourceType::ClusterLoadAssignment => "ClusterLoadAssignment",
        };
        f.write_str(name)
    }
}

/// A validated CDS update.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterUpdate {
    /// The cluster name.
    pub cluster_name: String,
    /// The EDS service name to request endpoints under; falls back to the
    /// cluster name when the server did not set one.
    pub eds_service_name: Option<String>,
    /// Name of the load balancing policy to run over this cluster's
    /// endpoints.
    pub lb_policy: String,
    /// Whether the server asked for load reporting to itself.
    pub lrs_server_self: bool,
}

impl ClusterUpdate {
    /// The resource name to use when subscribing for endpoints.
    pub fn endpoint_resource_name(&self) -> &str {
        self.eds_service_name.as_deref().unwrap_or(&self.cluster_name)
    }
}

/// A validated EDS update.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointUpdate {
    /// The cluster (or EDS service) this assignment belongs to.
    pub cluster_name: String,
    /// Endpoints grouped by locality.
    pub localities: Vec<LocalityEndpoints>,
    /// Categories of traffic the server wants dropped before picking.
    pub drop_policies: Vec<DropOverload>,
}

/// The endpoints of a single locality, with its weight and priority.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalityEndpoints {
    /// Where these endpoints run.
    pub locality: Locality,
    /// Relative load-balancing weight of this locality.
    pub weight: u32,
    /// Failover priority, 0 is highest.
    pub priority: u32,
    /// The endpoints themselves.
    pub endpoints: Vec<Endpoint>,
}

/// A single backend endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Host (IP or DNS name).
    pub address: String,
    /// Port.
    pub port: u16,
    /// Reported health.
    pub health: EndpointHealth,
    /// Relative weight within the locality.
    pub weight: u32,
}

/// Health of an endpoint as reported by the management server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointHealth {
    Unknown,
    Healthy,
    Unhealthy,
    Draining,
    Timeout,
    Degraded,
}

impl EndpointHealth {
    /// Whether the endpoint may receive new calls.
    pub fn is_usable(&self) -> bool {
        matches!(self, EndpointHealth::Healthy | EndpointHealth::Unknown)
    }
}

/// A drop policy for one category of traffic.
///
/// The rate is always normalized to parts per million, regardless of the
/// denominator the server used on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropOverload {
    /// Category label, echoed in load reports.
    pub category: String,
    /// Drop rate in parts per million, at most [`DROP_RATE_CEILING`].
    pub drop_per_million: u32,
}

/// A validated LDS update.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerUpdate {
    /// The listener name (the target authority).
    pub name: String,
    /// Name of the RouteConfiguration to fetch via RDS, if the listener
    /// did not inline one.
    pub route_config_name: Option<String>,
    /// The inlined route configuration, if present.
    pub route_config: Option<RouteUpdate>,
}

/// A validated RDS update, reduced to the first routable cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUpdate {
    /// The route configuration name.
    pub name: String,
    /// The cluster the default route points at.
    pub cluster_name: Option<String>,
}

/// Normalizes a fractional percentage to parts per million, clamped to
/// [`DROP_RATE_CEILING`].
fn per_million(numerator: u32, denominator_factor: u32) -> u32 {
    numerator
        .saturating_mul(denominator_factor)
        .min(DROP_RATE_CEILING)
}

/// Decodes and validates a CDS resource.
pub fn decode_cluster(resource: &ResourceAny) -> Result<ClusterUpdate> {
    use envoy_types::pb::envoy::config::cluster::v3 as cluster_pb;
    use envoy_types::pb::envoy::config::core::v3 as core;

    let cluster = cluster_pb::Cluster::decode(resource.value.clone())?;
    if cluster.name.is_empty() {
        return Err(Error::Validation("cluster has no name".to_string()));
    }

    match cluster.cluster_discovery_type {
        Some(cluster_pb::cluster::ClusterDiscoveryType::Type(t))
            if t == cluster_pb::cluster::DiscoveryType::Eds as i32 => {}
        _ => {
            return Err(Error::Validation(format!(
                "cluster {}: only EDS discovery is supported",
                cluster.name
            )));
        }
    }

    let eds_config = cluster.eds_cluster_config.as_ref().ok_or_else(|| {
        Error::Validation(format!("cluster {}: missing eds_cluster_config", cluster.name))
    })?;
    let specifier = eds_config
        .eds_config
        .as_ref()
        .and_then(|c| c.config_source_specifier.as_ref());
    match specifier {
        Some(core::config_source::ConfigSourceSpecifier::Ads(_))
        | Some(core::config_source::ConfigSourceSpecifier::Self_(_)) => {}
        _ => {
            return Err(Error::Validation(format!(
                "cluster {}: eds_config must use ADS",
                cluster.name
            )));
        }
    }

    if cluster.lb_policy != cluster_pb::cluster::LbPolicy::RoundRobin as i32 {
        return Err(Error::Validation(format!(
            "cluster {}: only ROUND_ROBIN lb_policy is supported",
            cluster.name
        )));
    }

    let eds_service_name = if eds_config.service_name.is_empty() {
        None
    } else {
        Some(eds_config.service_name.clone())
    };

    Ok(ClusterUpdate {
        cluster_name: cluster.name,
        eds_service_name,
        // EDS-discovered round-robin clusters delegate endpoint picking to
        // the endpoint discovery policy.
        lb_policy: "eds_experimental".to_string(),
        lrs_server_self: matches!(
            cluster
                .lrs_server
                .as_ref()
                .and_then(|s| s.config_source_specifier.as_ref()),
            Some(core::config_source::ConfigSourceSpecifier::Self_(_))
        ),
    })
}

/// Decodes and validates an EDS resource.
pub fn decode_endpoints(resource: &ResourceAny) -> Result<EndpointUpdate> {
    use envoy_types::pb::envoy::config::core::v3 as core;
    use envoy_types::pb::envoy::config::endpoint::v3 as endpoint_pb;
    use envoy_types::pb::envoy::r#type::v3::fractional_percent::DenominatorType;

    let assignment = endpoint_pb::ClusterLoadAssignment::decode(resource.value.clone())?;
    if assignment.cluster_name.is_empty() {
        return Err(Error::Validation(
            "cluster load assignment has no cluster_name".to_string(),
        ));
    }

    let mut localities = Vec::with_capacity(assignment.endpoints.len());
    for locality_endpoints in assignment.endpoints {
        let locality = locality_endpoints
            .locality
            .map(|l| Locality {
                region: l.region,
                zone: l.zone,
                sub_zone: l.sub_zone,
            })
            .unwrap_or_default();

        let mut endpoints = Vec::with_capacity(locality_endpoints.lb_endpoints.len());
        for lb_endpoint in locality_endpoints.lb_endpoints {
            let endpoint = match lb_endpoint.host_identifier {
                Some(endpoint_pb::lb_endpoint::HostIdentifier::Endpoint(e)) => e,
                _ => {
                    return Err(Error::Validation(format!(
                        "{}: lb_endpoint without an endpoint",
                        assignment.cluster_name
                    )));
                }
            };
            let socket_address = match endpoint.address.and_then(|a| a.address) {
                Some(core::address::Address::SocketAddress(s)) => s,
                _ => {
                    return Err(Error::Validation(format!(
                        "{}: endpoint without a socket address",
                        assignment.cluster_name
                    )));
                }
            };
            let port = match socket_address.port_specifier {
                Some(core::socket_address::PortSpecifier::PortValue(p)) => {
                    u16::try_from(p).map_err(|_| {
                        Error::Validation(format!(
                            "{}: port {} out of range",
                            assignment.cluster_name, p
                        ))
                    })?
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "{}: endpoint without a numeric port",
                        assignment.cluster_name
                    )));
                }
            };
            let health = match core::HealthStatus::try_from(lb_endpoint.health_status) {
                Ok(core::HealthStatus::Healthy) => EndpointHealth::Healthy,
                Ok(core::HealthStatus::Unhealthy) => EndpointHealth::Unhealthy,
                Ok(core::HealthStatus::Draining) => EndpointHealth::Draining,
                Ok(core::HealthStatus::Timeout) => EndpointHealth::Timeout,
                Ok(core::HealthStatus::Degraded) => EndpointHealth::Degraded,
                _ => EndpointHealth::Unknown,
            };
            endpoints.push(Endpoint {
                address: socket_address.address,
                port,
                health,
                weight: lb_endpoint.load_balancing_weight.map(|w| w.value).unwrap_or(1),
            });
        }

        localities.push(LocalityEndpoints {
            locality,
            weight: locality_endpoints
                .load_balancing_weight
                .map(|w| w.value)
                .unwrap_or(0),
            priority: locality_endpoints.priority,
            endpoints,
        });
    }

    let mut drop_policies = Vec::new();
    if let Some(policy) = assignment.policy {
        for drop in policy.drop_overloads {
            let Some(percentage) = drop.drop_percentage else {
                continue;
            };
            let factor = match DenominatorType::try_from(percentage.denominator) {
                Ok(DenominatorType::Hundred) => 10_000,
                Ok(DenominatorType::TenThousand) => 100,
                Ok(DenominatorType::Million) => 1,
                Err(_) => {
                    return Err(Error::Validation(format!(
                        "{}: unknown drop denominator {}",
                        assignment.cluster_name, percentage.denominator
                    )));
                }
            };
            drop_policies.push(DropOverload {
                category: drop.category,
                drop_per_million: per_million(percentage.numerator, factor),
            });
        }
    }

    Ok(EndpointUpdate {
        cluster_name: assignment.cluster_name,
        localities,
        drop_policies,
    })
}

/// Decodes and validates an LDS resource.
///
/// Only API listeners (the client-side kind) are accepted; the route
/// configuration may be inlined or named for a follow-up RDS request.
pub fn decode_listener(resource: &ResourceAny) -> Result<ListenerUpdate> {
    use envoy_types::pb::envoy::config::listener::v3 as listener_pb;
    use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3 as hcm_pb;

    let listener = listener_pb::Listener::decode(resource.value.clone())?;
    if listener.name.is_empty() {
        return Err(Error::Validation("listener has no name".to_string()));
    }

    let api_listener = listener
        .api_listener
        .and_then(|a| a.api_listener)
        .ok_or_else(|| {
            Error::Validation(format!("listener {}: not an API listener", listener.name))
        })?;
    if api_listener.type_url != HTTP_CONNECTION_MANAGER_TYPE_URL {
        return Err(Error::Validation(format!(
            "listener {}: unexpected api_listener type {}",
            listener.name, api_listener.type_url
        )));
    }

    let manager = hcm_pb::HttpConnectionManager::decode(api_listener.value.as_slice())?;
    match manager.route_specifier {
        Some(hcm_pb::http_connection_manager::RouteSpecifier::Rds(rds)) => Ok(ListenerUpdate {
            name: listener.name,
            route_config_name: Some(rds.route_config_name),
            route_config: None,
        }),
        Some(hcm_pb::http_connection_manager::RouteSpecifier::RouteConfig(rc)) => {
            let route = route_update_from_proto(rc)?;
            Ok(ListenerUpdate {
                name: listener.name,
                route_config_name: None,
                route_config: Some(route),
            })
        }
        _ => Err(Error::Validation(format!(
            "listener {}: no route specifier",
            listener.name
        ))),
    }
}

/// Decodes and validates an RDS resource.
pub fn decode_route_configuration(resource: &ResourceAny) -> Result<RouteUpdate> {
    use envoy_types::pb::envoy::config::route::v3 as route_pb;

    let route_config = route_pb::RouteConfiguration::decode(resource.value.clone())?;
    route_update_from_proto(route_config)
}

fn route_update_from_proto(
    route_config: envoy_types::pb::envoy::config::route::v3::RouteConfiguration,
) -> Result<RouteUpdate> {
    use envoy_types::pb::envoy::config::route::v3 as route_pb;

    if route_config.name.is_empty() {
        return Err(Error::Validation("route configuration has no name".to_string()));
    }

    // The first cluster-routing action wins; anything fancier is out of
    // scope for this client.
    let cluster_name = route_config
        .virtual_hosts
        .iter()
        .flat_map(|vh| vh.routes.iter())
        .find_map(|route| match &route.action {
            Some(route_pb::route::Action::Route(action)) => match &action.cluster_specifier {
                Some(route_pb::route_action::ClusterSpecifier::Cluster(name)) => {
                    Some(name.clone())
                }
                _ => None,
            },
            _ => None,
        });

    Ok(RouteUpdate {
        name: route_config.name,
        cluster_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::cluster::v3 as cluster_pb;
    use envoy_types::pb::envoy::config::core::v3 as core;
    use envoy_types::pb::envoy::config::endpoint::v3 as endpoint_pb;
    use envoy_types::pb::envoy::r#type::v3 as type_pb;
    use envoy_types::pb::google::protobuf::UInt32Value;
    use prost::Message;

    fn any_of(type_url: &str, message: &impl Message) -> ResourceAny {
        ResourceAny {
            type_url: type_url.to_string(),
            value: message.encode_to_vec().into(),
        }
    }

    fn eds_cluster(name: &str, service_name: &str) -> cluster_pb::Cluster {
        cluster_pb::Cluster {
            name: name.to_string(),
            cluster_discovery_type: Some(cluster_pb::cluster::ClusterDiscoveryType::Type(
                cluster_pb::cluster::DiscoveryType::Eds as i32,
            )),
            eds_cluster_config: Some(cluster_pb::cluster::EdsClusterConfig {
                eds_config: Some(core::ConfigSource {
                    config_source_specifier: Some(
                        core::config_source::ConfigSourceSpecifier::Ads(
                            core::AggregatedConfigSource::default(),
                        ),
                    ),
                    ..Default::default()
                }),
                service_name: service_name.to_string(),
            }),
            lb_policy: cluster_pb::cluster::LbPolicy::RoundRobin as i32,
            ..Default::default()
        }
    }

    fn socket_endpoint(address: &str, port: u32, health: core::HealthStatus) -> endpoint_pb::LbEndpoint {
        endpoint_pb::LbEndpoint {
            host_identifier: Some(endpoint_pb::lb_endpoint::HostIdentifier::Endpoint(
                endpoint_pb::Endpoint {
                    address: Some(core::Address {
                        address: Some(core::address::Address::SocketAddress(
                            core::SocketAddress {
                                address: address.to_string(),
                                port_specifier: Some(
                                    core::socket_address::PortSpecifier::PortValue(port),
                                ),
                                ..Default::default()
                            },
                        )),
                    }),
                    ..Default::default()
                },
            )),
            health_status: health as i32,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_cluster() {
        let proto = eds_cluster("cluster-a", "service-a");
        let update = decode_cluster(&any_of(CLUSTER_TYPE_URL, &proto)).unwrap();
        assert_eq!(update.cluster_name, "cluster-a");
        assert_eq!(update.eds_service_name.as_deref(), Some("service-a"));
        assert_eq!(update.endpoint_resource_name(), "service-a");
        assert_eq!(update.lb_policy, "eds_experimental");
        assert!(!update.lrs_server_self);
    }

    #[test]
    fn test_decode_cluster_defaults_service_name() {
        let proto = eds_cluster("cluster-a", "");
        let update = decode_cluster(&any_of(CLUSTER_TYPE_URL, &proto)).unwrap();
        assert_eq!(update.eds_service_name, None);
        assert_eq!(update.endpoint_resource_name(), "cluster-a");
    }

    #[test]
    fn test_decode_cluster_rejects_non_eds() {
        let mut proto = eds_cluster("cluster-a", "");
        proto.cluster_discovery_type = Some(cluster_pb::cluster::ClusterDiscoveryType::Type(
            cluster_pb::cluster::DiscoveryType::StrictDns as i32,
        ));
        let err = decode_cluster(&any_of(CLUSTER_TYPE_URL, &proto)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_decode_cluster_rejects_non_round_robin() {
        let mut proto = eds_cluster("cluster-a", "");
        proto.lb_policy = cluster_pb::cluster::LbPolicy::RingHash as i32;
        let err = decode_cluster(&any_of(CLUSTER_TYPE_URL, &proto)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_decode_endpoints() {
        let proto = endpoint_pb::ClusterLoadAssignment {
            cluster_name: "service-a".to_string(),
            endpoints: vec![endpoint_pb::LocalityLbEndpoints {
                locality: Some(core::Locality {
                    region: "us-west".to_string(),
                    zone: "a".to_string(),
                    sub_zone: String::new(),
                }),
                lb_endpoints: vec![
                    endpoint_pb::LbEndpoint {
                        load_balancing_weight: Some(UInt32Value { value: 7 }),
                        ..socket_endpoint("10.0.0.1", 8080, core::HealthStatus::Healthy)
                    },
                    socket_endpoint("10.0.0.2", 8080, core::HealthStatus::Draining),
                ],
                load_balancing_weight: Some(UInt32Value { value: 3 }),
                priority: 0,
                ..Default::default()
            }],
            ..Default::default()
        };

        let update = decode_endpoints(&any_of(CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, &proto)).unwrap();
        assert_eq!(update.cluster_name, "service-a");
        assert_eq!(update.localities.len(), 1);
        let locality = &update.localities[0];
        assert_eq!(locality.weight, 3);
        assert_eq!(locality.locality.region, "us-west");
        assert_eq!(locality.endpoints.len(), 2);
        assert_eq!(locality.endpoints[0].address, "10.0.0.1");
        assert_eq!(locality.endpoints[0].port, 8080);
        assert!(locality.endpoints[0].health.is_usable());
        assert_eq!(locality.endpoints[0].weight, 7);
        assert!(!locality.endpoints[1].health.is_usable());
        // An absent weight defaults to 1.
        assert_eq!(locality.endpoints[1].weight, 1);
    }

    #[test]
    fn test_drop_policy_normalization() {
        use type_pb::fractional_percent::DenominatorType;

        let cases = [
            // (numerator, denominator, expected per-million)
            (2, DenominatorType::Hundred, 20_000),
            (2, DenominatorType::TenThousand, 200),
            (2, DenominatorType::Million, 2),
            // 200% of traffic clamps to the ceiling.
            (200, DenominatorType::Hundred, DROP_RATE_CEILING),
            (u32::MAX, DenominatorType::Million, DROP_RATE_CEILING),
        ];

        for (numerator, denominator, want) in cases {
            let proto = endpoint_pb::ClusterLoadAssignment {
                cluster_name: "service-a".to_string(),
                policy: Some(endpoint_pb::cluster_load_assignment::Policy {
                    drop_overloads: vec![
                        endpoint_pb::cluster_load_assignment::policy::DropOverload {
                            category: "throttle".to_string(),
                            drop_percentage: Some(type_pb::FractionalPercent {
                                numerator,
                                denominator: denominator as i32,
                            }),
                        },
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            };
            let update =
                decode_endpoints(&any_of(CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, &proto)).unwrap();
            assert_eq!(update.drop_policies.len(), 1);
            assert_eq!(update.drop_policies[0].category, "throttle");
            assert_eq!(
                update.drop_policies[0].drop_per_million, want,
                "numerator {numerator} denominator {denominator:?}"
            );
        }
    }

    #[test]
    fn test_decode_endpoints_rejects_missing_address() {
        let proto = endpoint_pb::ClusterLoadAssignment {
            cluster_name: "service-a".to_string(),
            endpoints: vec![endpoint_pb::LocalityLbEndpoints {
                lb_endpoints: vec![endpoint_pb::LbEndpoint::default()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = decode_endpoints(&any_of(CLUSTER_LOAD_ASSIGNMENT_TYPE_URL, &proto)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_decode_listener_with_rds() {
        use envoy_types::pb::envoy::config::listener::v3 as listener_pb;
        use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3 as hcm_pb;
        use envoy_types::pb::google::protobuf::Any;

        let manager = hcm_pb::HttpConnectionManager {
            route_specifier: Some(hcm_pb::http_connection_manager::RouteSpecifier::Rds(
                hcm_pb::Rds {
                    route_config_name: "routes-1".to_string(),
                    ..Default::default()
                },
            )),
            ..Default::default()
        };
        let listener = listener_pb::Listener {
            name: "example.com:443".to_string(),
            api_listener: Some(listener_pb::ApiListener {
                api_listener: Some(Any {
                    type_url: HTTP_CONNECTION_MANAGER_TYPE_URL.to_string(),
                    value: manager.encode_to_vec(),
                }),
            }),
            ..Default::default()
        };

        let update = decode_listener(&any_of(LISTENER_TYPE_URL, &listener)).unwrap();
        assert_eq!(update.name, "example.com:443");
        assert_eq!(update.route_config_name.as_deref(), Some("routes-1"));
        assert!(update.route_config.is_none());
    }

    #[test]
    fn test_decode_route_configuration() {
        use envoy_types::pb::envoy::config::route::v3 as route_pb;

        let proto = route_pb::RouteConfiguration {
            name: "routes-1".to_string(),
            virtual_hosts: vec![route_pb::VirtualHost {
                name: "vh".to_string(),
                domains: vec!["*".to_string()],
                routes: vec![route_pb::Route {
                    action: Some(route_pb::route::Action::Route(route_pb::RouteAction {
                        cluster_specifier: Some(
                            route_pb::route_action::ClusterSpecifier::Cluster(
                                "cluster-a".to_string(),
                            ),
                        ),
                        ..Default::default()
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        let update = decode_route_configuration(&any_of(ROUTE_CONFIGURATION_TYPE_URL, &proto)).unwrap();
        assert_eq!(update.name, "routes-1");
        assert_eq!(update.cluster_name.as_deref(), Some("cluster-a"));
    }

    #[test]
    fn test_type_url_round_trip() {
        for rtype in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_url(rtype.type_url()), Some(rtype));
        }
        assert_eq!(ResourceType::from_type_url("type.googleapis.com/other"), None);
    }
}
