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

//! Trivial resolvers: a fixed address list, and a no-op.

use crate::client::name_resolution::{HostAddress, ResolutionResult, Resolver, Target};
use crate::client::service_config::ServiceConfig;
use tonic::Status;

/// Resolves every target to the same fixed address list.
pub struct StaticResolver {
    addresses: Vec<HostAddress>,
    service_config: Option<ServiceConfig>,
}

impl StaticResolver {
    pub fn new(addresses: Vec<HostAddress>) -> Self {
        Self {
            addresses,
            service_config: None,
        }
    }

    pub fn with_service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = Some(config);
        self
    }
}

#[tonic::async_trait]
impl Resolver for StaticResolver {
    fn scheme(&self) -> &str {
        "static"
    }

    async fn resolve(&self, _target: &Target) -> Result<ResolutionResult, Status> {
        let mut result = ResolutionResult::new(self.addresses.clone());
        if let Some(config) = &self.service_config {
            result = result.with_service_config(config.clone());
        }
        Ok(result)
    }
}

/// Resolves every target to an empty result. Useful when the policy layer
/// discovers its own addresses.
#[derive(Debug, Default)]
pub struct NopResolver;

#[tonic::async_trait]
impl Resolver for NopResolver {
    fn scheme(&self) -> &str {
        "nop"
    }

    async fn resolve(&self, _target: &Target) -> Result<ResolutionResult, Status> {
        Ok(ResolutionResult::new(vec![]))
    }
}
