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

//! xDS name resolution.
//!
//! Address discovery is deferred to the discovery-driven policies, so the
//! resolver produces zero addresses. What it does carry, as typed
//! attributes on the result, is the shared discovery client pool and the
//! cluster name taken from the target, which the cluster and endpoint
//! policies pick up downstream.

use crate::attributes::Attributes;
use crate::client::name_resolution::{ResolutionResult, Resolver, Target};
use crate::client::service_config::{CDS_EXPERIMENTAL, LbConfig, ServiceConfig};
use meshbal_xds::XdsClientPool;
use std::sync::Arc;
use tonic::Status;

/// Attribute carrying the shared discovery client pool.
#[derive(Clone)]
pub struct XdsClientPoolHandle(pub Arc<XdsClientPool>);

/// Attribute naming the cluster a discovery-driven policy should query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdsClusterName(pub String);

/// Attribute naming the endpoint-discovery service, set by the cluster
/// policy for its endpoint child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdsServiceName(pub String);

/// Resolver for `xds://` targets.
pub struct XdsResolver {
    pool: Arc<XdsClientPool>,
}

impl XdsResolver {
    pub fn new(pool: Arc<XdsClientPool>) -> Self {
        Self { pool }
    }
}

#[tonic::async_trait]
impl Resolver for XdsResolver {
    fn scheme(&self) -> &str {
        "xds"
    }

    async fn resolve(&self, target: &Target) -> Result<ResolutionResult, Status> {
        let attributes = Attributes::new()
            .add(XdsClientPoolHandle(Arc::clone(&self.pool)))
            .add(CdsClusterName(target.host.clone()));
        let config = ServiceConfig {
            load_balancing_configs: vec![LbConfig {
                policy_name: CDS_EXPERIMENTAL.to_string(),
                config: serde_json::Value::Null,
            }],
        };
        Ok(ResolutionResult::new(vec![])
            .with_service_config(config)
            .with_attributes(attributes))
    }
}
