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

//! Connectivity state tracking with one-shot change listeners.

use crate::client::ConnectivityState;
use std::sync::{Arc, Mutex};

/// Runs state-change callbacks off the caller's stack.
///
/// Listeners must not run under the manager's lock or reentrantly into
/// the code that triggered the transition, so they are handed to an
/// executor.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Spawns each callback as a tokio task.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move { task() });
    }
}

/// Runs callbacks inline. Deterministic ordering for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

type StateListener = Box<dyn FnOnce(ConnectivityState) + Send>;

struct ManagerState {
    current: ConnectivityState,
    listeners: Vec<StateListener>,
}

/// Tracks the connectivity state of a channel or subchannel and notifies
/// registered one-shot listeners on every transition.
///
/// Setting the current state again is a no-op, and no transitions leave
/// Shutdown.
pub struct ConnectivityStateManager {
    state: Mutex<ManagerState>,
    executor: Arc<dyn Executor>,
}

impl Default for ConnectivityStateManager {
    fn default() -> Self {
        Self::new(Arc::new(TokioExecutor))
    }
}

impl ConnectivityStateManager {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                current: ConnectivityState::Idle,
                listeners: Vec::new(),
            }),
            executor,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectivityState {
        self.state.lock().unwrap().current
    }

    /// Transitions to `new_state` and fires all pending listeners.
    ///
    /// Returns false when the transition was suppressed, either because
    /// the state is unchanged or because the manager is shut down.
    pub fn set_state(&self, new_state: ConnectivityState) -> bool {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            if state.current == new_state || state.current == ConnectivityState::Shutdown {
                return false;
            }
            tracing::debug!(from = %state.current, to = %new_state, "connectivity state change");
            state.current = new_state;
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            self.executor
                .execute(Box::new(move || listener(new_state)));
        }
        true
    }

    /// Registers a one-shot listener for the next state change away from
    /// `source`.
    ///
    /// If the current state already differs from `source` the listener
    /// fires immediately (through the executor) with the current state.
    pub fn notify_when_state_changed(
        &self,
        source: ConnectivityState,
        listener: impl FnOnce(ConnectivityState) + Send + 'static,
    ) {
        let current = {
            let mut state = self.state.lock().unwrap();
            if state.current == source {
                state.listeners.push(Box::new(listener));
                return;
            }
            state.current
        };
        self.executor
            .execute(Box::new(move || listener(current)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inline_manager() -> ConnectivityStateManager {
        ConnectivityStateManager::new(Arc::new(InlineExecutor))
    }

    #[test]
    fn test_initial_state_is_idle() {
        assert_eq!(inline_manager().state(), ConnectivityState::Idle);
    }

    #[test]
    fn test_set_state_notifies_listeners_once() {
        let manager = inline_manager();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        manager.notify_when_state_changed(ConnectivityState::Idle, move |state| {
            assert_eq!(state, ConnectivityState::Connecting);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.set_state(ConnectivityState::Connecting));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Listener was one-shot; a further transition does not re-fire it.
        assert!(manager.set_state(ConnectivityState::Ready));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_state_is_noop() {
        let manager = inline_manager();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        manager.notify_when_state_changed(ConnectivityState::Idle, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!manager.set_state(ConnectivityState::Idle));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_source_fires_immediately() {
        let manager = inline_manager();
        manager.set_state(ConnectivityState::Ready);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        manager.notify_when_state_changed(ConnectivityState::Idle, move |state| {
            assert_eq!(state, ConnectivityState::Ready);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let manager = inline_manager();
        assert!(manager.set_state(ConnectivityState::Shutdown));
        assert!(!manager.set_state(ConnectivityState::Ready));
        assert_eq!(manager.state(), ConnectivityState::Shutdown);
    }
}
