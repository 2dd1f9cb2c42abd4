//! ADS stream wrapper.
//!
//! [`AdsStream`] layers the discovery protocol bookkeeping on top of a raw
//! [`TransportStream`]: per-type version and nonce tracking, ACK/NACK
//! encoding, and decoding of incoming responses. It does not decide whether
//! a response is acceptable; that is the worker's job.

use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Node};
use crate::resource::ResourceType;
use crate::transport::{Transport, TransportStream};
use bytes::Bytes;
use std::collections::HashMap;
use tonic::Code;

#[derive(Debug, Default)]
struct TypeVersion {
    /// Version from the last ACKed response of this type.
    version: String,
    /// Nonce from the most recent response of this type.
    nonce: String,
}

/// A discovery stream with protocol state.
pub struct AdsStream<S, C> {
    stream: S,
    codec: C,
    node: Node,
    types: HashMap<ResourceType, TypeVersion>,
    closed: bool,
}

impl<S: TransportStream, C: XdsCodec> AdsStream<S, C> {
    /// Opens a stream through `transport` and sends one subscription
    /// request per entry in `initial`.
    ///
    /// The initial requests ride along with stream creation so that
    /// servers which withhold response headers until the first request
    /// cannot deadlock the setup.
    pub async fn connect<T>(
        transport: &T,
        codec: C,
        node: Node,
        initial: &[(ResourceType, Vec<String>)],
    ) -> Result<Self>
    where
        T: Transport<Stream = S>,
    {
        let mut requests = Vec::with_capacity(initial.len());
        for (resource_type, names) in initial {
            check_names(*resource_type, names)?;
            requests.push(encode_request(
                &codec,
                &node,
                *resource_type,
                names,
                "",
                "",
                None,
            )?);
        }
        let stream = transport.new_stream(requests).await?;
        Ok(Self {
            stream,
            codec,
            node,
            types: HashMap::new(),
            closed: false,
        })
    }

    /// Sends a subscription request for `resource_type`, echoing the
    /// current version and nonce.
    pub async fn send_request(
        &mut self,
        resource_type: ResourceType,
        names: &[String],
    ) -> Result<()> {
        self.check_open()?;
        check_names(resource_type, names)?;
        let (version, nonce) = self.current_state(resource_type);
        let bytes = encode_request(
            &self.codec,
            &self.node,
            resource_type,
            names,
            &version,
            &nonce,
            None,
        )?;
        self.stream.send(bytes).await
    }

    /// Accepts a response: records `version` for the type and echoes it,
    /// with the latest nonce, back to the server.
    pub async fn send_ack(
        &mut self,
        resource_type: ResourceType,
        names: &[String],
        version: &str,
    ) -> Result<()> {
        self.check_open()?;
        check_names(resource_type, names)?;
        self.types.entry(resource_type).or_default().version = version.to_string();
        let (version, nonce) = self.current_state(resource_type);
        let bytes = encode_request(
            &self.codec,
            &self.node,
            resource_type,
            names,
            &version,
            &nonce,
            None,
        )?;
        self.stream.send(bytes).await
    }

    /// Rejects a response: keeps the previously ACKed version and attaches
    /// an error detail explaining the rejection.
    pub async fn send_nack(
        &mut self,
        resource_type: ResourceType,
        names: &[String],
        message: &str,
    ) -> Result<()> {
        self.check_open()?;
        check_names(resource_type, names)?;
        let (version, nonce) = self.current_state(resource_type);
        let detail = ErrorDetail {
            code: Code::InvalidArgument as i32,
            message: message.to_string(),
        };
        let bytes = encode_request(
            &self.codec,
            &self.node,
            resource_type,
            names,
            &version,
            &nonce,
            Some(detail),
        )?;
        self.stream.send(bytes).await
    }

    /// Receives the next response.
    ///
    /// The nonce for the response's type is recorded before the response
    /// is handed back, so a following ACK or NACK echoes it. Responses
    /// with an unrecognized type URL are skipped.
    pub async fn recv(&mut self) -> Result<Option<(ResourceType, DiscoveryResponse)>> {
        self.check_open()?;
        loop {
            let Some(bytes) = self.stream.recv().await? else {
                return Ok(None);
            };
            let response = self.codec.decode_response(bytes)?;
            let Some(resource_type) = ResourceType::from_type_url(&response.type_url) else {
                tracing::debug!(type_url = %response.type_url, "ignoring unknown resource type");
                continue;
            };
            let state = self.types.entry(resource_type).or_default();
            state.nonce = response.nonce.clone();
            return Ok(Some((resource_type, response)));
        }
    }

    /// Marks the stream closed. Safe to call more than once.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn current_state(&mut self, resource_type: ResourceType) -> (String, String) {
        let state = self.types.entry(resource_type).or_default();
        (state.version.clone(), state.nonce.clone())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        Ok(())
    }
}

/// Route configurations are requested one at a time; every other type
/// accepts any number of names (empty meaning wildcard).
fn check_names(resource_type: ResourceType, names: &[String]) -> Result<()> {
    if resource_type == ResourceType::RouteConfiguration && names.len() != 1 {
        return Err(Error::InvalidOperation(format!(
            "route configuration requests take exactly one name, got {}",
            names.len()
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_request<C: XdsCodec>(
    codec: &C,
    node: &Node,
    resource_type: ResourceType,
    names: &[String],
    version: &str,
    nonce: &str,
    error_detail: Option<ErrorDetail>,
) -> Result<Bytes> {
    codec.encode_request(&DiscoveryRequest {
        version_info: version.to_string(),
        node: node.clone(),
        resource_names: names.to_vec(),
        type_url: resource_type.type_url().to_string(),
        response_nonce: nonce.to_string(),
        error_detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::prost::ProstCodec;
    use envoy_types::pb::envoy::service::discovery::v3 as discovery;
    use prost::Message;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    struct ChannelStream {
        sent: Arc<Mutex<Vec<Bytes>>>,
        incoming: mpsc::UnboundedReceiver<Result<Option<Bytes>>>,
    }

    impl TransportStream for ChannelStream {
        async fn send(&mut self, request: Bytes) -> Result<()> {
            self.sent.lock().unwrap().push(request);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Bytes>> {
            match self.incoming.recv().await {
                Some(item) => item,
                None => Ok(None),
            }
        }
    }

    struct ChannelTransport {
        sent: Arc<Mutex<Vec<Bytes>>>,
        incoming: Mutex<Option<mpsc::UnboundedReceiver<Result<Option<Bytes>>>>>,
    }

    impl Transport for ChannelTransport {
        type Stream = ChannelStream;

        async fn new_stream(&self, initial_requests: Vec<Bytes>) -> Result<Self::Stream> {
            let mut sent = self.sent.lock().unwrap();
            sent.extend(initial_requests);
            drop(sent);
            let incoming = self
                .incoming
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Connection("stream already taken".to_string()))?;
            Ok(ChannelStream {
                sent: Arc::clone(&self.sent),
                incoming,
            })
        }
    }

    fn harness() -> (
        ChannelTransport,
        Arc<Mutex<Vec<Bytes>>>,
        mpsc::UnboundedSender<Result<Option<Bytes>>>,
    ) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            sent: Arc::clone(&sent),
            incoming: Mutex::new(Some(rx)),
        };
        (transport, sent, tx)
    }

    fn decode_sent(sent: &Arc<Mutex<Vec<Bytes>>>) -> Vec<discovery::DiscoveryRequest> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|b| discovery::DiscoveryRequest::decode(b.clone()).unwrap())
            .collect()
    }

    fn response(resource_type: ResourceType, version: &str, nonce: &str) -> Bytes {
        discovery::DiscoveryResponse {
            version_info: version.to_string(),
            type_url: resource_type.type_url().to_string(),
            nonce: nonce.to_string(),
            ..Default::default()
        }
        .encode_to_vec()
        .into()
    }

    #[tokio::test]
    async fn test_ack_advances_version_and_echoes_nonce() {
        let (transport, sent, server_tx) = harness();
        let names = vec!["cluster-a".to_string()];
        let mut ads = AdsStream::connect(
            &transport,
            ProstCodec,
            Node::new("meshbal", "0.1"),
            &[(ResourceType::Cluster, names.clone())],
        )
        .await
        .unwrap();

        server_tx
            .send(Ok(Some(response(ResourceType::Cluster, "7", "nonce-1"))))
            .unwrap();
        let (resource_type, resp) = ads.recv().await.unwrap().unwrap();
        assert_eq!(resource_type, ResourceType::Cluster);

        ads.send_ack(ResourceType::Cluster, &names, &resp.version_info)
            .await
            .unwrap();

        let requests = decode_sent(&sent);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].version_info, "");
        assert_eq!(requests[0].response_nonce, "");
        assert_eq!(requests[1].version_info, "7");
        assert_eq!(requests[1].response_nonce, "nonce-1");
        assert!(requests[1].error_detail.is_none());
    }

    #[tokio::test]
    async fn test_nack_keeps_old_version() {
        let (transport, sent, server_tx) = harness();
        let names = vec!["cluster-a".to_string()];
        let mut ads = AdsStream::connect(
            &transport,
            ProstCodec,
            Node::new("meshbal", "0.1"),
            &[(ResourceType::Cluster, names.clone())],
        )
        .await
        .unwrap();

        // ACK version 7 first.
        server_tx
            .send(Ok(Some(response(ResourceType::Cluster, "7", "nonce-1"))))
            .unwrap();
        ads.recv().await.unwrap().unwrap();
        ads.send_ack(ResourceType::Cluster, &names, "7").await.unwrap();

        // Version 8 arrives but fails validation.
        server_tx
            .send(Ok(Some(response(ResourceType::Cluster, "8", "nonce-2"))))
            .unwrap();
        ads.recv().await.unwrap().unwrap();
        ads.send_nack(ResourceType::Cluster, &names, "bad cluster")
            .await
            .unwrap();

        let requests = decode_sent(&sent);
        let nack = requests.last().unwrap();
        assert_eq!(nack.version_info, "7");
        assert_eq!(nack.response_nonce, "nonce-2");
        let detail = nack.error_detail.as_ref().unwrap();
        assert_eq!(detail.code, Code::InvalidArgument as i32);
        assert_eq!(detail.message, "bad cluster");
    }

    #[tokio::test]
    async fn test_route_config_requires_single_name() {
        let (transport, _sent, _server_tx) = harness();
        let mut ads = AdsStream::connect(
            &transport,
            ProstCodec,
            Node::new("meshbal", "0.1"),
            &[],
        )
        .await
        .unwrap();

        let err = ads
            .send_request(ResourceType::RouteConfiguration, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));

        let err = ads
            .send_request(
                ResourceType::RouteConfiguration,
                &["a".to_string(), "b".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, _sent, _server_tx) = harness();
        let mut ads = AdsStream::connect(
            &transport,
            ProstCodec,
            Node::new("meshbal", "0.1"),
            &[],
        )
        .await
        .unwrap();

        ads.close();
        ads.close();
        let err = ads
            .send_request(ResourceType::Cluster, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
        let err = ads.recv().await.unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }

    #[tokio::test]
    async fn test_recv_skips_unknown_type_url() {
        let (transport, _sent, server_tx) = harness();
        let mut ads = AdsStream::connect(
            &transport,
            ProstCodec,
            Node::new("meshbal", "0.1"),
            &[],
        )
        .await
        .unwrap();

        let unknown: Bytes = discovery::DiscoveryResponse {
            type_url: "type.googleapis.com/some.Other".to_string(),
            ..Default::default()
        }
        .encode_to_vec()
        .into();
        server_tx.send(Ok(Some(unknown))).unwrap();
        server_tx
            .send(Ok(Some(response(ResourceType::Listener, "1", "n"))))
            .unwrap();

        let (resource_type, _) = ads.recv().await.unwrap().unwrap();
        assert_eq!(resource_type, ResourceType::Listener);
    }
}
