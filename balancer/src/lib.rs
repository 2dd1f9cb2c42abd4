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

//! Client-side load balancing for gRPC-style channels.
//!
//! This crate manages how a channel turns a target name into connections:
//! name resolution (DNS, static, xDS), subchannel lifecycle with
//! exponential connection backoff, load balancing policies that decide
//! which connections to hold, and pickers that choose a connection per
//! call. Discovery-driven policies lean on the `meshbal-xds` crate for
//! the ADS protocol.

pub mod attributes;
pub mod client;
pub mod sync;

pub use attributes::Attributes;
pub use client::ConnectivityState;
pub use client::load_balancing::picker::{PickResult, Picker};
pub use client::load_balancing::registry::LbPolicyRegistry;
pub use client::load_balancing::{ClusterDiscovery, LbPolicy};
pub use client::name_resolution::registry::ResolverRegistry;
pub use client::name_resolution::{
    HostAddress, ResolutionObserver, ResolutionResult, ResolutionWatcher, Resolver, Target,
};
pub use client::service_config::ServiceConfig;
pub use client::subchannel::Subchannel;
pub use sync::{ScheduledHandle, SynchronizationContext};
