//! Provides abstraction for transport layers.

use crate::error::Result;
use bytes::Bytes;
use std::future::Future;

pub mod tonic;

/// Factory for creating ADS transport streams.
///
/// This abstraction allows for different transport implementations:
/// tonic-based gRPC, mock transports for testing, or custom stacks.
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport.
    type Stream: TransportStream;

    /// Creates a new bidirectional ADS stream to the management server.
    ///
    /// `initial_requests` are queued ahead of any later [`TransportStream::send`]
    /// calls so data is available as soon as the server polls the request
    /// stream. Some servers hold response headers until the first request
    /// message arrives.
    fn new_stream(
        &self,
        initial_requests: Vec<Bytes>,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// A bidirectional byte stream for ADS communication.
///
/// Raw byte transport where the bytes are serialized DiscoveryRequest and
/// DiscoveryResponse messages; (de)serialization is handled by the codec
/// at the client worker layer.
pub trait TransportStream: Send + 'static {
    /// Send serialized DiscoveryRequest bytes to the server.
    fn send(&mut self, request: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Receive serialized DiscoveryResponse bytes from the server.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - Received a response.
    /// - `Ok(None)` - Stream closed normally.
    /// - `Err(_)` - Stream error (connection dropped, etc.)
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}
