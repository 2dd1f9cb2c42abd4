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

//! DNS name resolution with service-config TXT and balancer SRV lookups.
//!
//! Address (A/AAAA) lookup failures fail the resolution pass. TXT and SRV
//! lookups are best effort: a host without a `_grpc_config.<host>` record
//! falls back to a pick-first service config, and a host without
//! `_grpclb._tcp.<host>` simply has no balancer addresses.

use crate::client::name_resolution::{HostAddress, ResolutionResult, Resolver, Target};
use crate::client::service_config::{LbConfig, PICK_FIRST, ServiceConfig};
use std::net::IpAddr;
use std::sync::Arc;
use tonic::Status;

/// Name prefix for service-config TXT records.
pub const TXT_RECORD_PREFIX: &str = "_grpc_config.";
/// Name prefix for lookaside-balancer SRV records.
pub const SRV_RECORD_PREFIX: &str = "_grpclb._tcp.";

/// One SRV record target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

/// The raw lookups [`DnsResolver`] needs. Implemented over hickory for
/// production and over fixtures in tests.
#[tonic::async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, Status>;
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, Status>;
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Status>;
}

/// Resolver for `dns://` targets.
pub struct DnsResolver {
    lookup: Arc<dyn DnsLookup>,
}

impl DnsResolver {
    /// A resolver backed by the system DNS configuration.
    pub fn system() -> Result<Self, Status> {
        Ok(Self::with_lookup(Arc::new(HickoryLookup::from_system()?)))
    }

    pub fn with_lookup(lookup: Arc<dyn DnsLookup>) -> Self {
        Self { lookup }
    }

    fn default_service_config() -> ServiceConfig {
        ServiceConfig {
            load_balancing_configs: vec![LbConfig {
                policy_name: PICK_FIRST.to_string(),
                config: serde_json::Value::Null,
            }],
        }
    }
}

#[tonic::async_trait]
impl Resolver for DnsResolver {
    fn scheme(&self) -> &str {
        "dns"
    }

    async fn resolve(&self, target: &Target) -> Result<ResolutionResult, Status> {
        let ips = self.lookup.lookup_host(&target.host).await?;
        let mut addresses: Vec<HostAddress> = ips
            .into_iter()
            .map(|ip| HostAddress::new(ip.to_string(), target.port))
            .collect();

        match self
            .lookup
            .lookup_srv(&format!("{SRV_RECORD_PREFIX}{}", target.host))
            .await
        {
            Ok(srv_targets) => {
                addresses.extend(srv_targets.into_iter().map(|srv| {
                    HostAddress::balancer(srv.target, srv.port, srv.priority, srv.weight)
                }));
            }
            Err(status) => {
                tracing::debug!(host = %target.host, error = %status, "no balancer SRV records");
            }
        }

        let service_config = match self
            .lookup
            .lookup_txt(&format!("{TXT_RECORD_PREFIX}{}", target.host))
            .await
        {
            Ok(records) => ServiceConfig::from_txt_records(&records),
            Err(status) => {
                tracing::debug!(host = %target.host, error = %status, "no config TXT records");
                None
            }
        };

        Ok(ResolutionResult::new(addresses)
            .with_service_config(service_config.unwrap_or_else(Self::default_service_config)))
    }
}

/// [`DnsLookup`] over hickory with the tokio runtime. Supports TXT and
/// SRV lookups in addition to A and AAAA record lookups.
pub struct HickoryLookup {
    resolver: hickory_resolver::TokioResolver,
}

impl HickoryLookup {
    /// Builds a resolver from the system configuration.
    pub fn from_system() -> Result<Self, Status> {
        use hickory_resolver::TokioResolver;
        use hickory_resolver::config::LookupIpStrategy;
        use hickory_resolver::config::ResolverOpts;

        let builder = TokioResolver::builder_tokio()
            .map_err(|err| Status::internal(format!("system DNS configuration: {err}")))?;
        let mut resolver_opts = ResolverOpts::default();
        resolver_opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        Ok(HickoryLookup {
            resolver: builder.with_options(resolver_opts).build(),
        })
    }

    /// Builds a resolver that queries one specific DNS server.
    pub fn with_server(server: std::net::SocketAddr) -> Self {
        use hickory_resolver::TokioResolver;
        use hickory_resolver::config::LookupIpStrategy;
        use hickory_resolver::config::NameServerConfigGroup;
        use hickory_resolver::config::ResolverConfig;
        use hickory_resolver::config::ResolverOpts;
        use hickory_resolver::name_server::TokioConnectionProvider;

        let provider = TokioConnectionProvider::default();
        let name_servers =
            NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);
        let builder = TokioResolver::builder_with_config(config, provider);
        let mut resolver_opts = ResolverOpts::default();
        resolver_opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        HickoryLookup {
            resolver: builder.with_options(resolver_opts).build(),
        }
    }
}

#[tonic::async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, Status> {
        let response = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|err| Status::unavailable(err.to_string()))?;
        Ok(response.iter().collect())
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, Status> {
        let response = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|err| Status::unavailable(err.to_string()))?
            .iter()
            .map(|txt_record| {
                txt_record
                    .iter()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .collect::<Vec<String>>()
                    .join("")
            })
            .collect();
        Ok(response)
    }

    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Status> {
        let response = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|err| Status::unavailable(err.to_string()))?
            .iter()
            .map(|srv| SrvTarget {
                target: srv.target().to_string().trim_end_matches('.').to_string(),
                port: srv.port(),
                priority: srv.priority(),
                weight: srv.weight(),
            })
            .collect();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::service_config::GRPCLB;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    #[derive(Default)]
    struct FakeDns {
        hosts: HashMap<String, Vec<IpAddr>>,
        txt: HashMap<String, Vec<String>>,
        srv: HashMap<String, Vec<SrvTarget>>,
    }

    #[tonic::async_trait]
    impl DnsLookup for FakeDns {
        async fn lookup_host(&self, name: &str) -> Result<Vec<IpAddr>, Status> {
            self.hosts
                .get(name)
                .cloned()
                .ok_or_else(|| Status::not_found(format!("no A records for {name}")))
        }

        async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, Status> {
            self.txt
                .get(name)
                .cloned()
                .ok_or_else(|| Status::not_found(format!("no TXT records for {name}")))
        }

        async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Status> {
            self.srv
                .get(name)
                .cloned()
                .ok_or_else(|| Status::not_found(format!("no SRV records for {name}")))
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 1, 5, last))
    }

    #[tokio::test]
    async fn test_a_records_only_defaults_to_pick_first() {
        let mut dns = FakeDns::default();
        dns.hosts.insert(
            "my-service".to_string(),
            vec![ip(211), ip(212), ip(213)],
        );
        let resolver = DnsResolver::with_lookup(Arc::new(dns));

        let target = Target::parse("dns://my-service:80").unwrap();
        let result = resolver.resolve(&target).await.unwrap();

        assert_eq!(result.addresses.len(), 3);
        for (address, last) in result.addresses.iter().zip([211u8, 212, 213]) {
            assert_eq!(address.host, format!("10.1.5.{last}"));
            assert_eq!(address.port, Some(80));
            assert!(!address.is_load_balancer);
        }
        let config = result.service_config.unwrap().unwrap();
        assert_eq!(config.policy_candidates(), vec![PICK_FIRST]);
    }

    #[tokio::test]
    async fn test_txt_config_overrides_default() {
        let mut dns = FakeDns::default();
        dns.hosts.insert("svc".to_string(), vec![ip(1)]);
        dns.txt.insert(
            "_grpc_config.svc".to_string(),
            vec![
                r#"grpc_config=[{"serviceConfig":{"loadBalancingPolicy":"grpclb"}}]"#.to_string(),
            ],
        );
        let resolver = DnsResolver::with_lookup(Arc::new(dns));

        let target = Target::parse("dns://svc").unwrap();
        let result = resolver.resolve(&target).await.unwrap();
        let config = result.service_config.unwrap().unwrap();
        assert_eq!(config.policy_candidates(), vec![GRPCLB]);
    }

    #[tokio::test]
    async fn test_unparseable_txt_falls_back_to_default() {
        let mut dns = FakeDns::default();
        dns.hosts.insert("svc".to_string(), vec![ip(1)]);
        dns.txt.insert(
            "_grpc_config.svc".to_string(),
            vec!["grpc_config=not json".to_string()],
        );
        let resolver = DnsResolver::with_lookup(Arc::new(dns));

        let target = Target::parse("dns://svc").unwrap();
        let result = resolver.resolve(&target).await.unwrap();
        let config = result.service_config.unwrap().unwrap();
        assert_eq!(config.policy_candidates(), vec![PICK_FIRST]);
    }

    #[tokio::test]
    async fn test_srv_records_marked_as_balancers() {
        let mut dns = FakeDns::default();
        dns.hosts.insert("svc".to_string(), vec![ip(1)]);
        dns.srv.insert(
            "_grpclb._tcp.svc".to_string(),
            vec![SrvTarget {
                target: "balancer.svc".to_string(),
                port: 9000,
                priority: 1,
                weight: 10,
            }],
        );
        let resolver = DnsResolver::with_lookup(Arc::new(dns));

        let target = Target::parse("dns://svc:80").unwrap();
        let result = resolver.resolve(&target).await.unwrap();
        assert_eq!(result.addresses.len(), 2);

        let balancer = &result.addresses[1];
        assert!(balancer.is_load_balancer);
        assert_eq!(balancer.host, "balancer.svc");
        assert_eq!(balancer.port, Some(9000));
        assert_eq!(balancer.priority, 1);
        assert_eq!(balancer.weight, 10);
    }

    #[tokio::test]
    async fn test_host_lookup_failure_is_fatal() {
        let resolver = DnsResolver::with_lookup(Arc::new(FakeDns::default()));
        let target = Target::parse("dns://missing").unwrap();
        assert!(resolver.resolve(&target).await.is_err());
    }
}
