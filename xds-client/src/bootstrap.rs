//! Bootstrap configuration for the xDS client.
//!
//! The bootstrap file is a JSON document, conventionally pointed at by the
//! `MESHBAL_XDS_BOOTSTRAP` environment variable, that names the management
//! servers to talk to and the node identity to present to them.

use crate::error::{Error, Result};
use crate::message::{Locality, Node};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the bootstrap file path.
pub const BOOTSTRAP_ENV_VAR: &str = "MESHBAL_XDS_BOOTSTRAP";

/// Client feature advertised to management servers: locality weights are
/// used as-is, without overprovisioning adjustment.
pub const CLIENT_FEATURE_NO_OVERPROVISIONING: &str =
    "envoy.lb.does_not_support_overprovisioning";

const USER_AGENT_NAME: &str = "meshbal";
const USER_AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parsed bootstrap configuration.
#[derive(Debug, Clone)]
pub struct BootstrapInfo {
    /// Management servers, in preference order. Never empty.
    pub servers: Vec<ServerConfig>,
    /// Node identity presented on every discovery request, already
    /// augmented with the user agent and client features.
    pub node: Node,
}

/// A single management server entry.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Target URI of the management server.
    pub server_uri: String,
    /// Channel credential specs, in preference order.
    pub channel_creds: Vec<ChannelCreds>,
}

impl ServerConfig {
    /// Whether any of the credential entries calls for an insecure channel.
    pub fn allows_insecure(&self) -> bool {
        self.channel_creds.iter().any(|c| c.creds_type == "insecure")
    }
}

/// A channel credential spec from the bootstrap file.
#[derive(Debug, Clone)]
pub struct ChannelCreds {
    /// Credential type, e.g. `"insecure"` or `"google_default"`.
    pub creds_type: String,
    /// Opaque credential-specific configuration.
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BootstrapJson {
    #[serde(default)]
    xds_servers: Vec<XdsServerJson>,
    node: Option<NodeJson>,
}

#[derive(Debug, Deserialize)]
struct XdsServerJson {
    server_uri: String,
    #[serde(default)]
    channel_creds: Vec<ChannelCredsJson>,
}

#[derive(Debug, Deserialize)]
struct ChannelCredsJson {
    #[serde(rename = "type")]
    creds_type: String,
    config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NodeJson {
    id: Option<String>,
    cluster: Option<String>,
    locality: Option<LocalityJson>,
}

#[derive(Debug, Deserialize)]
struct LocalityJson {
    #[serde(default)]
    region: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    sub_zone: String,
}

impl BootstrapInfo {
    /// Loads the bootstrap file named by [`BOOTSTRAP_ENV_VAR`].
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(BOOTSTRAP_ENV_VAR).map_err(|_| {
            Error::Bootstrap(format!("{BOOTSTRAP_ENV_VAR} is not set"))
        })?;
        Self::from_file(Path::new(&path))
    }

    /// Loads and parses a bootstrap file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Bootstrap(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    /// Parses bootstrap JSON.
    ///
    /// A missing `node` section yields an empty node; either way the node
    /// is augmented with this client's user agent and feature flags.
    pub fn parse(contents: &str) -> Result<Self> {
        let json: BootstrapJson = serde_json::from_str(contents)
            .map_err(|e| Error::Bootstrap(format!("invalid bootstrap JSON: {e}")))?;

        if json.xds_servers.is_empty() {
            return Err(Error::Bootstrap("no xds_servers configured".to_string()));
        }

        let servers = json
            .xds_servers
            .into_iter()
            .map(|server| {
                if server.server_uri.is_empty() {
                    return Err(Error::Bootstrap("xds server with empty server_uri".to_string()));
                }
                Ok(ServerConfig {
                    server_uri: server.server_uri,
                    channel_creds: server
                        .channel_creds
                        .into_iter()
                        .map(|c| ChannelCreds {
                            creds_type: c.creds_type,
                            config: c.config,
                        })
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut node = Node::new(USER_AGENT_NAME, USER_AGENT_VERSION)
            .with_client_feature(CLIENT_FEATURE_NO_OVERPROVISIONING);
        if let Some(node_json) = json.node {
            if let Some(id) = node_json.id {
                node = node.with_id(id);
            }
            if let Some(cluster) = node_json.cluster {
                node = node.with_cluster(cluster);
            }
            if let Some(locality) = node_json.locality {
                node = node.with_locality(Locality {
                    region: locality.region,
                    zone: locality.zone,
                    sub_zone: locality.sub_zone,
                });
            }
        }

        Ok(BootstrapInfo { servers, node })
    }

    /// The first (most preferred) management server.
    pub fn primary_server(&self) -> &ServerConfig {
        // Parsing guarantees at least one entry.
        &self.servers[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_BOOTSTRAP: &str = r#"{
        "xds_servers": [
            {
                "server_uri": "xds.example.com:443",
                "channel_creds": [{ "type": "insecure" }]
            },
            {
                "server_uri": "backup.example.com:443"
            }
        ],
        "node": {
            "id": "node-1",
            "cluster": "cluster-1",
            "locality": { "region": "us-west", "zone": "a" }
        }
    }"#;

    #[test]
    fn test_parse_full() {
        let info = BootstrapInfo::parse(FULL_BOOTSTRAP).unwrap();
        assert_eq!(info.servers.len(), 2);
        assert_eq!(info.primary_server().server_uri, "xds.example.com:443");
        assert!(info.primary_server().allows_insecure());
        assert!(!info.servers[1].allows_insecure());

        assert_eq!(info.node.id.as_deref(), Some("node-1"));
        assert_eq!(info.node.cluster.as_deref(), Some("cluster-1"));
        let locality = info.node.locality.as_ref().unwrap();
        assert_eq!(locality.region, "us-west");
        assert_eq!(locality.zone, "a");
        assert_eq!(locality.sub_zone, "");
        assert_eq!(info.node.user_agent_name, "meshbal");
        assert!(info
            .node
            .client_features
            .contains(&CLIENT_FEATURE_NO_OVERPROVISIONING.to_string()));
    }

    #[test]
    fn test_parse_missing_node() {
        let info = BootstrapInfo::parse(
            r#"{ "xds_servers": [{ "server_uri": "xds.example.com:443" }] }"#,
        )
        .unwrap();
        assert_eq!(info.node.id, None);
        assert_eq!(info.node.user_agent_name, "meshbal");
        assert!(!info.node.client_features.is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_servers() {
        let err = BootstrapInfo::parse(r#"{ "xds_servers": [] }"#).unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));

        let err = BootstrapInfo::parse(r#"{}"#).unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = BootstrapInfo::parse("not json").unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_BOOTSTRAP.as_bytes()).unwrap();

        let info = BootstrapInfo::from_file(file.path()).unwrap();
        assert_eq!(info.servers.len(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        let err = BootstrapInfo::from_file(Path::new("/nonexistent/bootstrap.json")).unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }
}
