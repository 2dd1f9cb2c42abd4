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

//! Subchannels: one logical connection to one address.
//!
//! A subchannel does not own a transport here; the policy layer reports
//! connection outcomes through [`Subchannel::connection_ready`] and
//! [`Subchannel::connection_failed`]. The subchannel's job is the state
//! machine around those reports: Idle to Connecting on demand, Ready on
//! success, TransientFailure plus a backoff-scheduled reconnect on
//! failure, and a terminal Shutdown.

use crate::client::ConnectivityState;
use crate::client::backoff::ExponentialBackoff;
use crate::client::connectivity::{ConnectivityStateManager, Executor, TokioExecutor};
use crate::sync::{ScheduledHandle, SynchronizationContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tonic::Status;

/// A single connection's worth of state for one backend address.
pub struct Subchannel {
    host: String,
    port: u16,
    sync: Arc<SynchronizationContext>,
    state: ConnectivityStateManager,
    backoff: Mutex<ExponentialBackoff>,
    started: AtomicBool,
    retry_timer: Mutex<Option<ScheduledHandle>>,
}

impl Subchannel {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        sync: Arc<SynchronizationContext>,
    ) -> Arc<Self> {
        Self::with_executor(host, port, sync, Arc::new(TokioExecutor))
    }

    /// Like [`new`](Self::new) but with an explicit listener executor.
    pub fn with_executor(
        host: impl Into<String>,
        port: u16,
        sync: Arc<SynchronizationContext>,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            host: host.into(),
            port,
            sync,
            state: ConnectivityStateManager::new(executor),
            backoff: Mutex::new(ExponentialBackoff::standard()),
            started: AtomicBool::new(false),
            retry_timer: Mutex::new(None),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.state()
    }

    /// Registers a one-shot listener for the next transition away from
    /// `source`.
    pub fn notify_on_state_change(
        &self,
        source: ConnectivityState,
        listener: impl FnOnce(ConnectivityState) + Send + 'static,
    ) {
        self.state.notify_when_state_changed(source, listener);
    }

    /// Starts the subchannel, transitioning Idle to Connecting. May only
    /// be called once.
    pub fn start(self: &Arc<Self>) -> Result<(), Status> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Status::failed_precondition("subchannel already started"));
        }
        self.request_connection();
        Ok(())
    }

    /// Asks the subchannel to connect. A no-op once shut down.
    pub fn request_connection(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.sync.execute(move || {
            this.state.set_state(ConnectivityState::Connecting);
        });
    }

    /// Reports a successful connection: Ready, and the backoff schedule
    /// starts over.
    pub fn connection_ready(self: &Arc<Self>) -> Result<(), Status> {
        self.check_not_shutdown()?;
        let this = Arc::clone(self);
        self.sync.execute(move || {
            if this.state.set_state(ConnectivityState::Ready) {
                this.backoff.lock().unwrap().reset();
            }
        });
        Ok(())
    }

    /// Reports a failed connection attempt: TransientFailure now, another
    /// connection attempt after the next backoff interval.
    pub fn connection_failed(self: &Arc<Self>, status: Status) -> Result<(), Status> {
        self.check_not_shutdown()?;
        let this = Arc::clone(self);
        self.sync.execute(move || {
            if !this.state.set_state(ConnectivityState::TransientFailure) {
                return;
            }
            let delay = this.backoff.lock().unwrap().backoff_duration();
            tracing::debug!(
                host = %this.host,
                port = this.port,
                error = %status,
                retry_in = ?delay,
                "connection attempt failed"
            );
            let retry_target = Arc::clone(&this);
            let handle = this.sync.schedule(delay, move || {
                retry_target.request_connection_locked();
            });
            if let Some(previous) = this.retry_timer.lock().unwrap().replace(handle) {
                previous.cancel();
            }
        });
        Ok(())
    }

    /// Shuts the subchannel down, cancelling any pending reconnect.
    /// Safe to call more than once.
    pub fn shutdown(self: &Arc<Self>) {
        if let Some(timer) = self.retry_timer.lock().unwrap().take() {
            timer.cancel();
        }
        let this = Arc::clone(self);
        self.sync.execute(move || {
            this.state.set_state(ConnectivityState::Shutdown);
        });
    }

    /// Variant of [`request_connection`](Self::request_connection) for
    /// callers already running inside the synchronization context.
    fn request_connection_locked(self: &Arc<Self>) {
        self.sync.assert_in_context();
        self.state.set_state(ConnectivityState::Connecting);
    }

    fn check_not_shutdown(&self) -> Result<(), Status> {
        if self.state.state() == ConnectivityState::Shutdown {
            return Err(Status::failed_precondition("subchannel is shut down"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Subchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subchannel")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn subchannel() -> Arc<Subchannel> {
        Subchannel::new(
            "10.0.0.1",
            50051,
            Arc::new(SynchronizationContext::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_transitions_to_connecting() {
        let sc = subchannel();
        assert_eq!(sc.state(), ConnectivityState::Idle);
        sc.start().unwrap();
        assert_eq!(sc.state(), ConnectivityState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_errors() {
        let sc = subchannel();
        sc.start().unwrap();
        let err = sc.start().unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_schedules_backoff_reconnect() {
        let sc = subchannel();
        sc.start().unwrap();
        sc.connection_failed(Status::unavailable("refused")).unwrap();
        assert_eq!(sc.state(), ConnectivityState::TransientFailure);

        // First backoff is at most 1.2s with default jitter.
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(sc.state(), ConnectivityState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_resets_backoff() {
        let sc = subchannel();
        sc.start().unwrap();

        // Walk the backoff up, then succeed.
        for _ in 0..3 {
            sc.connection_failed(Status::unavailable("refused")).unwrap();
            tokio::time::sleep(Duration::from_secs(4)).await;
            tokio::task::yield_now().await;
        }
        sc.connection_ready().unwrap();
        assert_eq!(sc.state(), ConnectivityState::Ready);

        // After a reset, the next retry fires within the base interval
        // again (at most 1.2s).
        sc.connection_failed(Status::unavailable("refused")).unwrap();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        tokio::task::yield_now().await;
        assert_eq!(sc.state(), ConnectivityState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_reconnect() {
        let sc = subchannel();
        sc.start().unwrap();
        sc.connection_failed(Status::unavailable("refused")).unwrap();
        sc.shutdown();
        sc.shutdown(); // idempotent

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(sc.state(), ConnectivityState::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_after_shutdown_error() {
        let sc = subchannel();
        sc.start().unwrap();
        sc.shutdown();

        let err = sc.connection_ready().unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
        let err = sc
            .connection_failed(Status::unavailable("refused"))
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }
}
