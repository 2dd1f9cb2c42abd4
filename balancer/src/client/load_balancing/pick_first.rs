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

//! The pick-first policy: one subchannel to the first backend address.

use crate::client::load_balancing::picker::PickResult;
use crate::client::load_balancing::{LbPolicy, backend_addresses, check_service_name};
use crate::client::name_resolution::ResolutionResult;
use crate::client::subchannel::Subchannel;
use crate::sync::SynchronizationContext;
use std::sync::{Arc, Mutex};
use tonic::Status;

pub struct PickFirstPolicy {
    sync: Arc<SynchronizationContext>,
    inner: Mutex<Inner>,
}

struct Inner {
    subchannel: Option<Arc<Subchannel>>,
    shut_down: bool,
}

impl PickFirstPolicy {
    pub fn new(sync: Arc<SynchronizationContext>) -> Self {
        Self {
            sync,
            inner: Mutex::new(Inner {
                subchannel: None,
                shut_down: false,
            }),
        }
    }
}

#[tonic::async_trait]
impl LbPolicy for PickFirstPolicy {
    async fn create_subchannels(
        &self,
        resolution: ResolutionResult,
        service_name: &str,
        is_secure: bool,
    ) -> Result<(), Status> {
        check_service_name(service_name)?;
        let backends = backend_addresses(&resolution);
        let first = backends.first().ok_or_else(|| {
            Status::invalid_argument("pick_first requires at least one non-balancer address")
        })?;

        let subchannel = Subchannel::new(
            first.host.clone(),
            first.port_or_default(is_secure),
            Arc::clone(&self.sync),
        );
        subchannel.start()?;

        let previous = {
            let mut inner = self.inner.lock().unwrap();
            if inner.shut_down {
                subchannel.shutdown();
                return Err(Status::failed_precondition("policy is shut down"));
            }
            inner.subchannel.replace(subchannel)
        };
        if let Some(previous) = previous {
            previous.shutdown();
        }
        Ok(())
    }

    fn pick(&self) -> PickResult {
        match &self.inner.lock().unwrap().subchannel {
            Some(subchannel) => PickResult::Ready(Arc::clone(subchannel)),
            None => PickResult::Queue,
        }
    }

    fn shutdown(&self) {
        let subchannel = {
            let mut inner = self.inner.lock().unwrap();
            inner.shut_down = true;
            inner.subchannel.take()
        };
        if let Some(subchannel) = subchannel {
            subchannel.shutdown();
        }
    }
}
