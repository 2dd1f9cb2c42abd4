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

//! A serializing executor for balancer state transitions.
//!
//! [`SynchronizationContext`] runs queued actions one at a time, in FIFO
//! order, without dedicating a thread: whichever caller submits work while
//! no other drain is in progress becomes the drainer and runs actions
//! until the queue empties. Actions submitted from inside an action are
//! appended and run later, never reentrantly.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send>;

/// Receives payloads of actions that panicked while draining.
pub type PanicHandler = Box<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

thread_local! {
    /// Addresses of the contexts currently draining on this thread.
    static ACTIVE_CONTEXTS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// A FIFO action queue with a single drainer.
pub struct SynchronizationContext {
    queue: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
    panic_handler: PanicHandler,
}

impl Default for SynchronizationContext {
    fn default() -> Self {
        Self::new(Box::new(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "action panicked in synchronization context");
        }))
    }
}

impl SynchronizationContext {
    /// Creates a context routing action panics to `panic_handler`.
    pub fn new(panic_handler: PanicHandler) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            panic_handler,
        }
    }

    /// Enqueues an action and drains the queue unless another caller
    /// already is.
    ///
    /// The action may run on this thread before `execute` returns, or on
    /// whichever thread currently holds the drain.
    pub fn execute(self: &Arc<Self>, action: impl FnOnce() + Send + 'static) {
        self.execute_later(action);
        self.drain();
    }

    /// Enqueues an action without draining. The action runs when some
    /// caller next drains the queue.
    pub fn execute_later(&self, action: impl FnOnce() + Send + 'static) {
        self.queue.lock().unwrap().push_back(Box::new(action));
    }

    /// Runs queued actions until the queue is empty, if no other thread
    /// is already draining.
    pub fn drain(self: &Arc<Self>) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                // Someone else is draining; they will see our actions.
                return;
            }

            let id = Arc::as_ptr(self) as usize;
            ACTIVE_CONTEXTS.with(|active| active.borrow_mut().push(id));
            loop {
                let task = self.queue.lock().unwrap().pop_front();
                let Some(task) = task else { break };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                    (self.panic_handler)(payload);
                }
            }
            ACTIVE_CONTEXTS.with(|active| {
                active.borrow_mut().pop();
            });
            self.draining.store(false, Ordering::Release);

            // An action enqueued between our last pop and the store above
            // could otherwise be stranded with no drainer.
            if self.queue.lock().unwrap().is_empty() {
                return;
            }
        }
    }

    /// Panics unless called from an action running on this context.
    ///
    /// State guarded by the context uses this to catch code paths that
    /// bypass the queue.
    pub fn assert_in_context(self: &Arc<Self>) {
        let id = Arc::as_ptr(self) as usize;
        let in_context = ACTIVE_CONTEXTS.with(|active| active.borrow().contains(&id));
        assert!(
            in_context,
            "not running inside the synchronization context"
        );
    }

    /// Schedules an action to be enqueued after `delay`.
    ///
    /// The returned handle cancels the timer; cancellation after the
    /// action was enqueued has no effect.
    pub fn schedule(
        self: &Arc<Self>,
        delay: Duration,
        action: impl FnOnce() + Send + 'static,
    ) -> ScheduledHandle {
        let fired_or_cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired_or_cancelled);
        let context = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.swap(true, Ordering::SeqCst) {
                context.execute(action);
            }
        });
        ScheduledHandle {
            fired_or_cancelled,
            task,
        }
    }
}

/// Handle to a scheduled action.
#[derive(Debug)]
pub struct ScheduledHandle {
    fired_or_cancelled: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl ScheduledHandle {
    /// Cancels the scheduled action. Returns false if it already ran or
    /// was already cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = !self.fired_or_cancelled.swap(true, Ordering::SeqCst);
        self.task.abort();
        cancelled
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
