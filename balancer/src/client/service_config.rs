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

//! Service config parsing.
//!
//! A service config is a JSON document, typically delivered through name
//! resolution, whose load balancing section selects the channel's policy.
//! Two fields matter here: `loadBalancingConfig`, an ordered list of
//! single-key objects naming candidate policies with their configs, and
//! the older `loadBalancingPolicy` string, which is appended as a final
//! candidate.

use serde_json::Value;
use tonic::Status;

/// Name of the pick-first policy.
pub const PICK_FIRST: &str = "pick_first";
/// Name of the round-robin policy.
pub const ROUND_ROBIN: &str = "round_robin";
/// Name of the lookaside balancer policy.
pub const GRPCLB: &str = "grpclb";
/// Name of the cluster discovery policy.
pub const CDS_EXPERIMENTAL: &str = "cds_experimental";
/// Name of the endpoint discovery policy.
pub const EDS_EXPERIMENTAL: &str = "eds_experimental";
/// Name of the listener-based discovery policy.
pub const XDS_EXPERIMENTAL: &str = "xds_experimental";

/// Prefix that marks a TXT record as carrying channel configuration.
pub const TXT_CONFIG_PREFIX: &str = "grpc_config=";

/// One candidate load balancing policy with its raw JSON config.
#[derive(Debug, Clone, PartialEq)]
pub struct LbConfig {
    pub policy_name: String,
    pub config: Value,
}

/// A parsed service config, reduced to the load balancing section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceConfig {
    /// Candidate policies in preference order.
    pub load_balancing_configs: Vec<LbConfig>,
}

impl ServiceConfig {
    /// Parses a service config JSON document.
    pub fn parse(contents: &str) -> Result<Self, Status> {
        let json: Value = serde_json::from_str(contents).map_err(|e| {
            Status::invalid_argument(format!("invalid service config JSON: {e}"))
        })?;
        Self::from_value(&json)
    }

    fn from_value(json: &Value) -> Result<Self, Status> {
        let object = json
            .as_object()
            .ok_or_else(|| Status::invalid_argument("service config must be a JSON object"))?;

        let mut load_balancing_configs = Vec::new();

        if let Some(configs) = object.get("loadBalancingConfig") {
            let configs = configs.as_array().ok_or_else(|| {
                Status::invalid_argument("loadBalancingConfig must be an array")
            })?;
            for entry in configs {
                let entry = entry.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
                    Status::invalid_argument(
                        "each loadBalancingConfig entry must be an object with one key",
                    )
                })?;
                // The single key names the policy.
                if let Some((name, config)) = entry.iter().next() {
                    load_balancing_configs.push(LbConfig {
                        policy_name: name.clone(),
                        config: config.clone(),
                    });
                }
            }
        }

        // The deprecated field is a plain policy name, usually uppercased.
        // It ranks after everything in loadBalancingConfig.
        if let Some(policy) = object.get("loadBalancingPolicy") {
            let name = policy.as_str().ok_or_else(|| {
                Status::invalid_argument("loadBalancingPolicy must be a string")
            })?;
            load_balancing_configs.push(LbConfig {
                policy_name: name.to_ascii_lowercase(),
                config: Value::Null,
            });
        }

        Ok(ServiceConfig {
            load_balancing_configs,
        })
    }

    /// Candidate policy names in preference order.
    pub fn policy_candidates(&self) -> Vec<&str> {
        self.load_balancing_configs
            .iter()
            .map(|c| c.policy_name.as_str())
            .collect()
    }

    /// Extracts a service config from DNS TXT records.
    ///
    /// Records not starting with [`TXT_CONFIG_PREFIX`] are ignored. The
    /// payload is a JSON array of config choices, each with a
    /// `serviceConfig` field; the first choice that parses wins.
    /// Returns None when no record carries a usable config.
    pub fn from_txt_records(records: &[String]) -> Option<Self> {
        for record in records {
            let Some(payload) = record.strip_prefix(TXT_CONFIG_PREFIX) else {
                continue;
            };
            let Ok(choices) = serde_json::from_str::<Value>(payload) else {
                tracing::debug!("ignoring unparseable TXT config record");
                continue;
            };
            let choices = match choices.as_array() {
                Some(choices) => choices.clone(),
                // A bare object is treated as a single choice.
                None => vec![choices],
            };
            for choice in &choices {
                let Some(config) = choice.get("serviceConfig") else {
                    continue;
                };
                if let Ok(parsed) = Self::from_value(config) {
                    return Some(parsed);
                }
            }
        }
        None
    }
}
