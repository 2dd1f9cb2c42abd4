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

use crate::client::load_balancing::LbPolicy;
use std::sync::Arc;
use tonic::Status;

/// Builds a fresh policy instance. Captures whatever the policy needs
/// (sync context, discovery pool, balancer connector) at registration.
pub type PolicyBuilder = Box<dyn Fn() -> Arc<dyn LbPolicy> + Send + Sync>;

/// A name-keyed set of load balancing policy builders.
///
/// The owning channel constructs one, registers its policies, and passes
/// it down. A policy may be registered under several names (aliases).
#[derive(Default)]
pub struct LbPolicyRegistry {
    builders: Vec<(String, PolicyBuilder)>,
}

impl LbPolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, builder: PolicyBuilder) {
        self.builders.push((name.into(), builder));
    }

    /// Walks the service config's candidate names in order and builds the
    /// first one with a registered provider.
    ///
    /// Names match case-insensitively. No registered candidate is a
    /// wiring defect reported as a failed-precondition status.
    pub fn select(&self, candidates: &[&str]) -> Result<Arc<dyn LbPolicy>, Status> {
        for candidate in candidates {
            if let Some((name, builder)) = self
                .builders
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(candidate))
            {
                tracing::debug!(policy = %name, "selected load balancing policy");
                return Ok(builder());
            }
        }
        Err(Status::failed_precondition(format!(
            "no registered load balancing policy among [{}]",
            candidates.join(", ")
        )))
    }
}

impl std::fmt::Debug for LbPolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.builders.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("LbPolicyRegistry")
            .field("policies", &names)
            .finish()
    }
}
