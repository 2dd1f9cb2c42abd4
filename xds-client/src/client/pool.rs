//! Reference-counted sharing of a single [`XdsClient`].
//!
//! Every channel targeting an xDS authority shares one client, so one
//! ADS stream serves the whole process. The pool hands out clones of
//! the current client and disposes it when the last borrower returns.

use crate::client::XdsClient;
use crate::error::{Error, Result};
use std::sync::Mutex;

/// Factory invoked when the pool needs a fresh client.
pub type ClientFactory = Box<dyn Fn() -> Result<XdsClient> + Send + Sync>;

#[derive(Default)]
struct PoolState {
    client: Option<XdsClient>,
    ref_count: usize,
}

/// A pool holding at most one live [`XdsClient`].
pub struct XdsClientPool {
    factory: ClientFactory,
    state: Mutex<PoolState>,
}

impl XdsClientPool {
    /// Creates a pool around a client factory.
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            factory,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Borrows the shared client, creating it on first use.
    pub fn get(&self) -> Result<XdsClient> {
        let mut state = self.state.lock().unwrap();
        if let Some(client) = state.client.clone() {
            state.ref_count += 1;
            return Ok(client);
        }
        if state.ref_count != 0 {
            return Err(Error::InvalidOperation(format!(
                "pool has {} outstanding references but no client",
                state.ref_count
            )));
        }
        let client = (self.factory)()?;
        state.client = Some(client.clone());
        state.ref_count = 1;
        Ok(client)
    }

    /// Returns a borrowed client. The instance must be the one this pool
    /// currently holds; a handle from an earlier generation, or one never
    /// obtained here, is rejected without touching the count. When the
    /// last borrower returns, the client is closed and the slot emptied so
    /// the next [`get`](Self::get) builds a fresh one.
    pub fn put(&self, instance: &XdsClient) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match &state.client {
            Some(client) if client.same_worker(instance) => {}
            _ => {
                return Err(Error::InvalidOperation(
                    "returned client is not the one this pool handed out".to_string(),
                ));
            }
        }
        state.ref_count -= 1;
        if state.ref_count == 0 {
            if let Some(client) = state.client.take() {
                client.close();
            }
        }
        Ok(())
    }

    /// Number of outstanding borrowers, for tests and diagnostics.
    pub fn ref_count(&self) -> usize {
        self.state.lock().unwrap().ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::prost::ProstCodec;
    use crate::message::Node;
    use crate::transport::{Transport, TransportStream};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct IdleTransport;
    struct IdleStream;

    impl Transport for IdleTransport {
        type Stream = IdleStream;

        async fn new_stream(&self, _initial_requests: Vec<Bytes>) -> Result<Self::Stream> {
            Ok(IdleStream)
        }
    }

    impl TransportStream for IdleStream {
        async fn send(&mut self, _request: Bytes) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Bytes>> {
            std::future::pending().await
        }
    }

    fn counting_pool() -> (XdsClientPool, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = XdsClientPool::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(XdsClient::new(
                IdleTransport,
                ProstCodec,
                Node::new("meshbal", "0.1"),
            ))
        }));
        (pool, created)
    }

    #[tokio::test]
    async fn test_shared_until_last_return() {
        let (pool, created) = counting_pool();

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), 2);

        pool.put(&a).unwrap();
        assert_eq!(pool.ref_count(), 1);
        pool.put(&b).unwrap();
        assert_eq!(pool.ref_count(), 0);

        // Next borrow builds a fresh client.
        let _c = pool.get().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_put_without_get_errors() {
        let (pool, _) = counting_pool();
        let foreign = XdsClient::new(IdleTransport, ProstCodec, Node::new("meshbal", "0.1"));
        let err = pool.put(&foreign).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(pool.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_excess_return_is_rejected() {
        let (pool, _) = counting_pool();
        let client = pool.get().unwrap();
        pool.put(&client).unwrap();

        // The slot is empty; the same handle cannot be returned again.
        let err = pool.put(&client).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(pool.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_generation_return_is_rejected() {
        let (pool, created) = counting_pool();

        let first = pool.get().unwrap();
        pool.put(&first).unwrap();

        // A later borrow builds a second generation.
        let second = pool.get().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.ref_count(), 1);

        // Returning the first-generation handle must not release the
        // client the live borrower holds.
        let err = pool.put(&first).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(pool.ref_count(), 1);

        pool.put(&second).unwrap();
        assert_eq!(pool.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_factory_error_propagates() {
        let pool = XdsClientPool::new(Box::new(|| {
            Err(Error::Bootstrap("no bootstrap file".to_string()))
        }));
        let err = pool.get().unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
        assert_eq!(pool.ref_count(), 0);
    }
}
