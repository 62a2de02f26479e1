//! Media engine abstraction.
//!
//! The orchestrator drives the transcoding engine only through
//! [`MediaEngine`]. [`kurento::KurentoClient`] is the production
//! implementation; [`mock::MockEngine`] records calls for tests.

pub mod kurento;
#[cfg(any(test, feature = "test-harness"))]
pub mod mock;

use crate::config::BandwidthLimits;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("cannot connect to media server {uri}: {reason}")]
    Connect { uri: String, reason: String },
    #[error("media server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("media server request timed out: {0}")]
    Timeout(String),
    #[error("media server connection closed")]
    Closed,
    #[error("malformed media server reply: {0}")]
    Malformed(String),
}

/// Engine-side object reference (pipeline or endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A WebRTC ICE candidate as exchanged with browsers and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u32>,
}

pub const MEDIA_STATE_CONNECTED: &str = "CONNECTED";

/// Asynchronous notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    IceCandidateFound {
        source: ObjectId,
        candidate: IceCandidate,
    },
    MediaStateChanged {
        source: ObjectId,
        old_state: String,
        new_state: String,
    },
}

impl EngineEvent {
    pub fn source(&self) -> &ObjectId {
        match self {
            Self::IceCandidateFound { source, .. } | Self::MediaStateChanged { source, .. } => {
                source
            }
        }
    }
}

/// Operations the orchestrator needs from the transcoding engine.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_pipeline(&self) -> Result<ObjectId>;
    async fn create_player(&self, pipeline: &ObjectId, uri: &str) -> Result<ObjectId>;
    async fn create_webrtc(&self, pipeline: &ObjectId) -> Result<ObjectId>;
    async fn create_recorder(
        &self,
        pipeline: &ObjectId,
        uri: &str,
        media_profile: &str,
    ) -> Result<ObjectId>;
    async fn connect(&self, source: &ObjectId, sink: &ObjectId) -> Result<()>;
    async fn add_ice_candidate(&self, endpoint: &ObjectId, candidate: &IceCandidate) -> Result<()>;
    async fn set_bandwidth(&self, endpoint: &ObjectId, limits: &BandwidthLimits) -> Result<()>;
    async fn process_offer(&self, endpoint: &ObjectId, offer: &str) -> Result<String>;
    async fn gather_candidates(&self, endpoint: &ObjectId) -> Result<()>;
    async fn play(&self, player: &ObjectId) -> Result<()>;
    async fn record(&self, recorder: &ObjectId) -> Result<()>;
    async fn stop(&self, endpoint: &ObjectId) -> Result<()>;
    async fn release(&self, object: &ObjectId) -> Result<()>;

    /// Subscribe to engine notifications for every object on this connection.
    fn events(&self) -> broadcast::Receiver<EngineEvent>;
    fn is_closed(&self) -> bool;
    async fn close(&self);
}

/// Factory for engine connections.
#[async_trait::async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn MediaEngine>>;
}

struct SlotInner {
    leases: usize,
    engine: Option<Arc<dyn MediaEngine>>,
}

/// The process-wide engine handle, shared by all sessions.
///
/// Connected when the lease count goes 0 -> 1 and closed when it returns
/// to 0. Count and handle sit under one lock so a release can never close a
/// handle that a concurrent acquire just picked up.
pub struct EngineSlot {
    connector: Arc<dyn EngineConnector>,
    inner: Mutex<SlotInner>,
}

impl EngineSlot {
    pub fn new(connector: Arc<dyn EngineConnector>) -> Self {
        Self {
            connector,
            inner: Mutex::new(SlotInner {
                leases: 0,
                engine: None,
            }),
        }
    }

    /// Take a lease, connecting first if there is no live handle.
    pub async fn acquire(&self) -> Result<Arc<dyn MediaEngine>> {
        let mut inner = self.inner.lock().await;
        let live = inner.engine.as_ref().filter(|e| !e.is_closed()).cloned();
        let engine = match live {
            Some(engine) => engine,
            None => {
                if inner.engine.is_some() {
                    log::warn!("Media server connection lost, reconnecting");
                }
                let engine = self.connector.connect().await?;
                log::info!("Media server connected");
                inner.engine = Some(engine.clone());
                engine
            }
        };
        inner.leases += 1;
        log::debug!("engine lease acquired ({} active)", inner.leases);
        Ok(engine)
    }

    /// Return a lease. The last one closes the connection.
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        if inner.leases == 0 {
            log::warn!("engine lease released with no active leases");
            return;
        }
        inner.leases -= 1;
        log::debug!("engine lease released ({} active)", inner.leases);
        if inner.leases == 0 {
            if let Some(engine) = inner.engine.take() {
                engine.close().await;
                log::info!("Media server connection closed (no active sessions)");
            }
        }
    }

    pub async fn leases(&self) -> usize {
        self.inner.lock().await.leases
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .await
            .engine
            .as_ref()
            .is_some_and(|e| !e.is_closed())
    }
}
