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

//! Pickers: stateless strategies mapping a call to a subchannel.

use crate::client::subchannel::Subchannel;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tonic::Status;

/// The outcome of asking a picker for a subchannel.
#[derive(Debug, Clone)]
pub enum PickResult {
    /// Use this subchannel for the call.
    Ready(Arc<Subchannel>),
    /// No subchannel available yet; buffer the call and retry after the
    /// next picker update.
    Queue,
    /// Fail the call with this status; normal retry semantics apply.
    Fail(Status),
    /// Drop the call with this status, bypassing retries.
    Drop(Status),
}

/// A strategy that selects a subchannel for each outgoing call.
///
/// Pickers are immutable snapshots; the owning policy swaps in a new one
/// when membership changes. `pick` must be safe under concurrent callers.
pub trait Picker: Send + Sync {
    fn pick(&self) -> PickResult;
}

/// Always queues: the policy has no subchannels yet.
#[derive(Debug, Default)]
pub struct EmptyPicker;

impl Picker for EmptyPicker {
    fn pick(&self) -> PickResult {
        PickResult::Queue
    }
}

/// Always drops with an internal error. Installed when the policy
/// detects a broken invariant, so that the breakage is visible per call
/// instead of silently queueing forever.
#[derive(Debug)]
pub struct PanicPicker {
    message: String,
}

impl PanicPicker {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Picker for PanicPicker {
    fn pick(&self) -> PickResult {
        PickResult::Drop(Status::internal(self.message.clone()))
    }
}

/// Always returns the one subchannel it wraps.
pub struct ReadyPicker {
    subchannel: Arc<Subchannel>,
}

impl ReadyPicker {
    pub fn new(subchannel: Arc<Subchannel>) -> Self {
        Self { subchannel }
    }
}

impl Picker for ReadyPicker {
    fn pick(&self) -> PickResult {
        PickResult::Ready(Arc::clone(&self.subchannel))
    }
}

/// Cycles over a fixed, non-empty subchannel list in order.
pub struct RoundRobinPicker {
    subchannels: Vec<Arc<Subchannel>>,
    next: AtomicUsize,
}

impl RoundRobinPicker {
    /// Fails with an invalid-argument status on an empty list.
    pub fn new(subchannels: Vec<Arc<Subchannel>>) -> Result<Self, Status> {
        if subchannels.is_empty() {
            return Err(Status::invalid_argument(
                "round robin picker requires at least one subchannel",
            ));
        }
        Ok(Self {
            subchannels,
            next: AtomicUsize::new(0),
        })
    }
}

impl Picker for RoundRobinPicker {
    fn pick(&self) -> PickResult {
        // Wrapping overflow of the counter only perturbs the cycle once
        // every usize::MAX picks.
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.subchannels.len();
        PickResult::Ready(Arc::clone(&self.subchannels[index]))
    }
}

/// Selects a child picker by weight.
///
/// With a zero total weight, children are drawn uniformly. Otherwise a
/// draw `r` in `[0, total)` selects the first child whose cumulative
/// weight strictly exceeds `r`, so a zero-weight child is never picked
/// while any sibling carries weight.
pub struct WeightedRandomPicker {
    children: Vec<(u32, Box<dyn Picker>)>,
    total_weight: u64,
}

impl WeightedRandomPicker {
    /// Fails with an invalid-argument status on an empty list.
    pub fn new(children: Vec<(u32, Box<dyn Picker>)>) -> Result<Self, Status> {
        if children.is_empty() {
            return Err(Status::invalid_argument(
                "weighted random picker requires at least one child",
            ));
        }
        let total_weight = children.iter().map(|(w, _)| u64::from(*w)).sum();
        Ok(Self {
            children,
            total_weight,
        })
    }
}

impl Picker for WeightedRandomPicker {
    fn pick(&self) -> PickResult {
        if self.total_weight == 0 {
            let index = rand::rng().random_range(0..self.children.len());
            return self.children[index].1.pick();
        }
        let r = rand::rng().random_range(0..self.total_weight);
        let mut cumulative = 0u64;
        for (weight, child) in &self.children {
            cumulative += u64::from(*weight);
            if cumulative > r {
                return child.pick();
            }
        }
        // Unreachable with a positive total weight; every draw lands
        // below the final cumulative sum.
        PickResult::Drop(Status::internal("weighted pick fell through"))
    }
}
