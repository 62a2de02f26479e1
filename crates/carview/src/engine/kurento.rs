//! Kurento Media Server client (JSON-RPC 2.0 over WebSocket).
//!
//! One reader task routes replies to their waiting request by `id` and fans
//! `onEvent` notifications out on a broadcast channel. One writer task owns
//! the socket sink.

use super::{
    EngineConnector, EngineError, EngineEvent, IceCandidate, MediaEngine, ObjectId, Result,
};
use crate::config::BandwidthLimits;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct KurentoClient {
    uri: String,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    events: broadcast::Sender<EngineEvent>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl KurentoClient {
    pub async fn connect(uri: &str, request_timeout: Duration) -> Result<Self> {
        let connect_error = |reason: String| EngineError::Connect {
            uri: uri.to_string(),
            reason,
        };
        let (stream, _) = tokio::time::timeout(request_timeout, connect_async(uri))
            .await
            .map_err(|_| connect_error("timed out".to_string()))?
            .map_err(|e| connect_error(e.to_string()))?;
        log::info!("Connected to media server at {}", uri);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::default();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    log::error!("Media server write failed: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let reader = {
            let pending = pending.clone();
            let events = events.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => dispatch_frame(text.as_str(), &pending, &events),
                        Ok(Message::Close(_)) => {
                            log::debug!("Media server closed the connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("Media server read failed: {}", e);
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                fail_pending(&pending);
            })
        };

        Ok(Self {
            uri: uri.to_string(),
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            events,
            closed,
            request_timeout,
            reader,
            writer,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Send one request and wait for its reply.
    async fn request(&self, method: &str, mut params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let (Some(sid), Some(obj)) = (lock(&self.session_id).clone(), params.as_object_mut()) {
            obj.insert("sessionId".to_string(), Value::String(sid));
        }
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        log::debug!("kms -> {}", frame);
        if self.outbound.send(Message::Text(frame.to_string().into())).is_err() {
            lock(&self.pending).remove(&id);
            return Err(EngineError::Closed);
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(EngineError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(EngineError::Timeout(format!("{} (id {})", method, id)))
            }
        };
        let result = reply?;
        if let Some(sid) = result.get("sessionId").and_then(Value::as_str) {
            let mut current = lock(&self.session_id);
            if current.as_deref() != Some(sid) {
                *current = Some(sid.to_string());
            }
        }
        Ok(result)
    }

    async fn create(&self, kind: &str, constructor_params: Value) -> Result<ObjectId> {
        let result = self
            .request(
                "create",
                json!({
                    "type": kind,
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await?;
        let id = value_str(&result, "create")?;
        log::debug!("created {} {}", kind, id);
        Ok(ObjectId(id))
    }

    async fn invoke(&self, object: &ObjectId, operation: &str, params: Value) -> Result<Value> {
        let result = self
            .request(
                "invoke",
                json!({
                    "object": object,
                    "operation": operation,
                    "operationParams": params,
                }),
            )
            .await?;
        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn subscribe(&self, object: &ObjectId, event_type: &str) -> Result<()> {
        self.request(
            "subscribe",
            json!({
                "type": event_type,
                "object": object,
            }),
        )
        .await?;
        Ok(())
    }
}

impl Drop for KurentoClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn value_str(result: &Value, method: &str) -> Result<String> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::Malformed(format!("{} reply without string value", method)))
}

fn fail_pending(pending: &Pending) {
    let waiters: Vec<_> = lock(pending).drain().collect();
    for (_, tx) in waiters {
        let _ = tx.send(Err(EngineError::Closed));
    }
}

/// Route one inbound text frame.
fn dispatch_frame(text: &str, pending: &Pending, events: &broadcast::Sender<EngineEvent>) {
    log::debug!("kms <- {}", text);
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Ignoring non-JSON frame from media server: {}", e);
            return;
        }
    };

    if let Some((id, reply)) = parse_reply(&value) {
        match lock(pending).remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => log::debug!("reply for unknown request id {}", id),
        }
        return;
    }

    if value.get("method").and_then(Value::as_str) == Some("onEvent") {
        match value.get("params").and_then(parse_event) {
            Some(event) => {
                // no receivers just means no session is listening
                let _ = events.send(event);
            }
            None => log::debug!("unhandled media server event"),
        }
    }
}

/// Decode a JSON-RPC reply into its id and outcome.
fn parse_reply(value: &Value) -> Option<(u64, Result<Value>)> {
    if value.get("method").is_some() {
        return None;
    }
    let id = value.get("id")?.as_u64()?;
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Some((id, Err(EngineError::Rpc { code, message })));
    }
    Some((id, Ok(value.get("result").cloned().unwrap_or(Value::Null))))
}

/// Decode the `params` of an `onEvent` notification.
fn parse_event(params: &Value) -> Option<EngineEvent> {
    let value = params.get("value")?;
    let data = value.get("data")?;
    let kind = data
        .get("type")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)?;
    let source = data
        .get("source")
        .or_else(|| value.get("object"))
        .and_then(Value::as_str)
        .map(|s| ObjectId(s.to_string()))?;

    match kind {
        "IceCandidateFound" => {
            let candidate: IceCandidate =
                serde_json::from_value(data.get("candidate")?.clone()).ok()?;
            Some(EngineEvent::IceCandidateFound { source, candidate })
        }
        "MediaStateChanged" => Some(EngineEvent::MediaStateChanged {
            source,
            old_state: data.get("oldState")?.as_str()?.to_string(),
            new_state: data.get("newState")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

#[async_trait::async_trait]
impl MediaEngine for KurentoClient {
    async fn create_pipeline(&self) -> Result<ObjectId> {
        self.create("MediaPipeline", json!({})).await
    }

    async fn create_player(&self, pipeline: &ObjectId, uri: &str) -> Result<ObjectId> {
        self.create(
            "PlayerEndpoint",
            json!({ "mediaPipeline": pipeline, "uri": uri }),
        )
        .await
    }

    async fn create_webrtc(&self, pipeline: &ObjectId) -> Result<ObjectId> {
        let endpoint = self
            .create("WebRtcEndpoint", json!({ "mediaPipeline": pipeline }))
            .await?;
        self.subscribe(&endpoint, "IceCandidateFound").await?;
        self.subscribe(&endpoint, "MediaStateChanged").await?;
        Ok(endpoint)
    }

    async fn create_recorder(
        &self,
        pipeline: &ObjectId,
        uri: &str,
        media_profile: &str,
    ) -> Result<ObjectId> {
        self.create(
            "RecorderEndpoint",
            json!({
                "mediaPipeline": pipeline,
                "uri": uri,
                "mediaProfile": media_profile,
            }),
        )
        .await
    }

    async fn connect(&self, source: &ObjectId, sink: &ObjectId) -> Result<()> {
        self.invoke(source, "connect", json!({ "sink": sink })).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, endpoint: &ObjectId, candidate: &IceCandidate) -> Result<()> {
        let complex = json!({
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": candidate.candidate,
            "sdpMid": candidate.sdp_mid.clone().unwrap_or_default(),
            "sdpMLineIndex": candidate.sdp_m_line_index.unwrap_or(0),
        });
        self.invoke(endpoint, "addIceCandidate", json!({ "candidate": complex }))
            .await?;
        Ok(())
    }

    async fn set_bandwidth(&self, endpoint: &ObjectId, limits: &BandwidthLimits) -> Result<()> {
        let settings = [
            ("setMaxVideoSendBandwidth", limits.max_send_kbps),
            ("setMinVideoSendBandwidth", limits.min_send_kbps),
            ("setMaxVideoRecvBandwidth", limits.max_recv_kbps),
            ("setMinVideoRecvBandwidth", limits.min_recv_kbps),
        ];
        for (operation, kbps) in settings {
            self.invoke(endpoint, operation, json!({ "value": kbps }))
                .await?;
        }
        Ok(())
    }

    async fn process_offer(&self, endpoint: &ObjectId, offer: &str) -> Result<String> {
        let value = self
            .invoke(endpoint, "processOffer", json!({ "offer": offer }))
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngineError::Malformed("processOffer returned no answer".into()))
    }

    async fn gather_candidates(&self, endpoint: &ObjectId) -> Result<()> {
        self.invoke(endpoint, "gatherCandidates", json!({})).await?;
        Ok(())
    }

    async fn play(&self, player: &ObjectId) -> Result<()> {
        self.invoke(player, "play", json!({})).await?;
        Ok(())
    }

    async fn record(&self, recorder: &ObjectId) -> Result<()> {
        self.invoke(recorder, "record", json!({})).await?;
        Ok(())
    }

    async fn stop(&self, endpoint: &ObjectId) -> Result<()> {
        self.invoke(endpoint, "stop", json!({})).await?;
        Ok(())
    }

    async fn release(&self, object: &ObjectId) -> Result<()> {
        self.request("release", json!({ "object": object })).await?;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Message::Close(None));
        fail_pending(&self.pending);
        log::info!("Closed media server connection {}", self.uri);
    }
}

/// Opens a fresh [`KurentoClient`] per connect.
pub struct KurentoConnector {
    uri: String,
    request_timeout: Duration,
}

impl KurentoConnector {
    pub fn new(uri: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            request_timeout,
        }
    }
}

#[async_trait::async_trait]
impl EngineConnector for KurentoConnector {
    async fn connect(&self) -> Result<Arc<dyn MediaEngine>> {
        let client = KurentoClient::connect(&self.uri, self.request_timeout).await?;
        Ok(Arc::new(client))
    }
}
