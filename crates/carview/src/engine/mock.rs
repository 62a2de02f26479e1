//! In-process engine double for tests.
//!
//! Records every call in order, hands out predictable object ids, and can be
//! told to fail or pause at a named step.

use super::{
    EngineConnector, EngineError, EngineEvent, IceCandidate, MediaEngine, ObjectId, Result,
};
use crate::config::BandwidthLimits;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        kind: &'static str,
        id: ObjectId,
        uri: Option<String>,
    },
    Connect {
        source: ObjectId,
        sink: ObjectId,
    },
    AddIceCandidate {
        endpoint: ObjectId,
        candidate: String,
    },
    SetBandwidth(ObjectId),
    ProcessOffer(ObjectId),
    GatherCandidates(ObjectId),
    Play(ObjectId),
    Record(ObjectId),
    Stop(ObjectId),
    Release(ObjectId),
}

impl Call {
    /// Step name used by [`MockEngine::fail_on`] and [`MockEngine::hold_at`].
    pub fn step(&self) -> &'static str {
        match self {
            Call::Create { kind, .. } => match *kind {
                "MediaPipeline" => "create_pipeline",
                "PlayerEndpoint" => "create_player",
                "WebRtcEndpoint" => "create_webrtc",
                _ => "create_recorder",
            },
            Call::Connect { .. } => "connect",
            Call::AddIceCandidate { .. } => "add_ice_candidate",
            Call::SetBandwidth(_) => "set_bandwidth",
            Call::ProcessOffer(_) => "process_offer",
            Call::GatherCandidates(_) => "gather_candidates",
            Call::Play(_) => "play",
            Call::Record(_) => "record",
            Call::Stop(_) => "stop",
            Call::Release(_) => "release",
        }
    }
}

/// Pauses the engine the first time it reaches a step.
#[derive(Clone)]
pub struct HoldHandle {
    reached: Arc<Notify>,
    resume: Arc<Notify>,
}

impl HoldHandle {
    /// Wait until the engine is parked at the step.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the parked call continue.
    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

pub struct MockEngine {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    failures: Mutex<HashSet<&'static str>>,
    holds: Mutex<HashMap<&'static str, HoldHandle>>,
    events: broadcast::Sender<EngineEvent>,
    closed: AtomicBool,
    answer: String,
}

impl MockEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            failures: Mutex::new(HashSet::new()),
            holds: Mutex::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
            answer: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock answer\r\n".to_string(),
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Make every call of `step` fail with an RPC error.
    pub fn fail_on(&self, step: &'static str) {
        self.failures.lock().unwrap().insert(step);
    }

    /// Park the next call of `step` until the returned handle resumes it.
    pub fn hold_at(&self, step: &'static str) -> HoldHandle {
        let handle = HoldHandle {
            reached: Arc::new(Notify::new()),
            resume: Arc::new(Notify::new()),
        };
        self.holds.lock().unwrap().insert(step, handle.clone());
        handle
    }

    /// Inject an engine notification.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.calls().iter().map(Call::step).collect()
    }

    pub fn count(&self, step: &str) -> usize {
        self.calls().iter().filter(|c| c.step() == step).count()
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn new_id(&self, prefix: &str) -> ObjectId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ObjectId(format!("{}-{}", prefix, n))
    }

    async fn step(&self, call: Call) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let step = call.step();
        let hold = self.holds.lock().unwrap().remove(step);
        if let Some(hold) = hold {
            hold.reached.notify_one();
            hold.resume.notified().await;
        }
        self.calls.lock().unwrap().push(call);
        if self.failures.lock().unwrap().contains(step) {
            return Err(EngineError::Rpc {
                code: 40000,
                message: format!("{} failed", step),
            });
        }
        Ok(())
    }

    async fn create(&self, kind: &'static str, prefix: &str, uri: Option<&str>) -> Result<ObjectId> {
        let id = self.new_id(prefix);
        self.step(Call::Create {
            kind,
            id: id.clone(),
            uri: uri.map(str::to_string),
        })
        .await?;
        Ok(id)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaEngine for MockEngine {
    async fn create_pipeline(&self) -> Result<ObjectId> {
        self.create("MediaPipeline", "pipeline", None).await
    }

    async fn create_player(&self, _pipeline: &ObjectId, uri: &str) -> Result<ObjectId> {
        self.create("PlayerEndpoint", "player", Some(uri)).await
    }

    async fn create_webrtc(&self, _pipeline: &ObjectId) -> Result<ObjectId> {
        self.create("WebRtcEndpoint", "webrtc", None).await
    }

    async fn create_recorder(
        &self,
        _pipeline: &ObjectId,
        uri: &str,
        _media_profile: &str,
    ) -> Result<ObjectId> {
        self.create("RecorderEndpoint", "recorder", Some(uri)).await
    }

    async fn connect(&self, source: &ObjectId, sink: &ObjectId) -> Result<()> {
        self.step(Call::Connect {
            source: source.clone(),
            sink: sink.clone(),
        })
        .await
    }

    async fn add_ice_candidate(&self, endpoint: &ObjectId, candidate: &IceCandidate) -> Result<()> {
        self.step(Call::AddIceCandidate {
            endpoint: endpoint.clone(),
            candidate: candidate.candidate.clone(),
        })
        .await
    }

    async fn set_bandwidth(&self, endpoint: &ObjectId, _limits: &BandwidthLimits) -> Result<()> {
        self.step(Call::SetBandwidth(endpoint.clone())).await
    }

    async fn process_offer(&self, endpoint: &ObjectId, _offer: &str) -> Result<String> {
        self.step(Call::ProcessOffer(endpoint.clone())).await?;
        Ok(self.answer.clone())
    }

    async fn gather_candidates(&self, endpoint: &ObjectId) -> Result<()> {
        self.step(Call::GatherCandidates(endpoint.clone())).await
    }

    async fn play(&self, player: &ObjectId) -> Result<()> {
        self.step(Call::Play(player.clone())).await
    }

    async fn record(&self, recorder: &ObjectId) -> Result<()> {
        self.step(Call::Record(recorder.clone())).await
    }

    async fn stop(&self, endpoint: &ObjectId) -> Result<()> {
        self.step(Call::Stop(endpoint.clone())).await
    }

    async fn release(&self, object: &ObjectId) -> Result<()> {
        self.step(Call::Release(object.clone())).await
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared [`MockEngine`], reopening it on every connect.
pub struct MockConnector {
    engine: Arc<MockEngine>,
    connects: AtomicUsize,
    fail: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(MockEngine::new()),
            connects: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> Arc<MockEngine> {
        self.engine.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EngineConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn MediaEngine>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Connect {
                uri: "mock://engine".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.engine.reopen();
        Ok(self.engine.clone())
    }
}
