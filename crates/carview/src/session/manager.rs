//! Session registry and lifecycle coordinator.
//!
//! All session state lives in one map behind an async `RwLock`; external
//! calls (registry lookup, probe, vendor HTTP, engine RPC) never run while
//! the lock is held. Pipeline negotiation runs on its own task and only
//! touches the map to flush candidates and to commit its result.

use super::candidates::{self, Submitted};
use super::{
    CameraSnapshot, Result, Session, SessionError, SessionId, SessionState, ViewParams,
};
use crate::camera::CameraDirectory;
use crate::config::ServerConfig;
use crate::engine::{EngineConnector, EngineError, EngineSlot, IceCandidate, MediaEngine, ObjectId};
use crate::pipeline::{self, NegotiationContext, PipelineError, PipelineHandle, PipelineRequest};
use crate::probe;
use crate::protocol::{ConnectResult, ServerMessage, ViewRequest};
use crate::recording;
use crate::vendor::{self, CameraHttp};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, RwLock};

/// Successful connect: the new session id and the camera snapshot.
#[derive(Debug, Clone)]
pub struct ConnectGrant {
    pub session_id: SessionId,
    pub camera: CameraSnapshot,
}

impl ConnectGrant {
    pub fn into_result(self) -> ConnectResult {
        let record = self.camera.record;
        let auth = self.camera.auth;
        ConnectResult {
            streaming_name: record.streaming_name,
            streaming_car_id: record.streaming_car_id,
            streaming_ip: record.streaming_ip,
            streaming_id: record.streaming_id,
            streaming_password: record.streaming_password,
            camera_code: record.camera_code,
            authentication_id: auth.authentication_id,
            encoded_password: auth.encoded_password,
            ptz_possible: auth.ptz_possible,
            stream_uuid: self.session_id.to_string(),
        }
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    cameras: Arc<dyn CameraDirectory>,
    engine: EngineSlot,
    http: reqwest::Client,
    config: ServerConfig,
}

impl SessionManager {
    pub fn new(
        config: ServerConfig,
        cameras: Arc<dyn CameraDirectory>,
        connector: Arc<dyn EngineConnector>,
    ) -> Arc<Self> {
        let http = CameraHttp::build_client(config.camera.http_timeout());
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            cameras,
            engine: EngineSlot::new(connector),
            http,
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn cameras(&self) -> &Arc<dyn CameraDirectory> {
        &self.cameras
    }

    /// HTTP client for a camera's firmware port.
    pub fn camera_http(&self, host: &str) -> CameraHttp {
        CameraHttp::new(self.http.clone(), host, self.config.camera.http_port)
    }

    /// Admission control and vendor handshake for `name`. On success a
    /// session in AUTHENTICATED state is registered for `channel`.
    pub async fn request_connect(
        &self,
        name: &str,
        channel: &mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<ConnectGrant> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::MissingParameter("streamingName"));
        }
        log::info!("[{}] connect requested", name);

        let record = match self.cameras.lookup(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(SessionError::NotFound),
            Err(e) => {
                log::error!("[{}] camera registry lookup failed: {}", name, e);
                return Err(SessionError::NotFound);
            }
        };

        let camera = &self.config.camera;
        let reachable = probe::probe(&record.streaming_ip, camera.rtsp_port, camera.probe_timeout())
            .await
            .reachable;
        if !reachable {
            log::info!("[{}] {}:{} unreachable", name, record.streaming_ip, camera.rtsp_port);
            return Err(SessionError::Unreachable(record.streaming_name));
        }

        let protocol = vendor::protocol_for(record.camera_code);
        log::info!("[{}] authenticating ({})", name, protocol.name());
        let http = self.camera_http(&record.streaming_ip);
        let auth = protocol
            .authenticate(&http, &record)
            .await
            .map_err(|e| {
                log::warn!("[{}] {} handshake failed: {}", name, protocol.name(), e);
                SessionError::AuthFailed(e.to_string())
            })?;

        let session_id = SessionId::new();
        let snapshot = CameraSnapshot { record, auth };
        let session = Session::new(session_id.clone(), snapshot.clone(), channel.downgrade());
        self.sessions.write().await.insert(session_id.clone(), session);
        log::info!(
            "[{}] session {} {} (ptz: {})",
            name,
            session_id,
            SessionState::Authenticated,
            snapshot.auth.ptz_possible
        );

        Ok(ConnectGrant {
            session_id,
            camera: snapshot,
        })
    }

    /// Start pipeline negotiation for an AUTHENTICATED session. The answer
    /// or failure is delivered on the session's channel.
    pub async fn request_view(self: &Arc<Self>, id: &SessionId, req: &ViewRequest) -> Result<()> {
        let params = ViewParams::from_request(req)?;

        let cancel = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
            if session.state() != SessionState::Authenticated {
                return Err(SessionError::InvalidState {
                    id: id.to_string(),
                    state: session.state(),
                });
            }
            if params.streaming_name != session.camera.record.streaming_name {
                return Err(SessionError::InvalidParameter("streamingName"));
            }
            session.transition(SessionState::Negotiating)?;
            session.cancel.subscribe()
        };

        let request = self.pipeline_request(id, params);
        let manager = self.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.negotiate(id, request, cancel).await });
        Ok(())
    }

    fn pipeline_request(&self, id: &SessionId, params: ViewParams) -> PipelineRequest {
        let recording = &self.config.recording;
        let name = recording::recording_name(
            chrono::Local::now(),
            &params.streaming_name,
            &params.disaster_number,
            &params.car_number,
            id.as_str(),
            &recording.extension,
        );
        PipelineRequest {
            source_uri: recording::source_uri(
                &params.rtsp_ip,
                self.config.camera.rtsp_port,
                &self.config.camera.rtsp_path,
            ),
            recording_uri: recording::recording_uri(&recording.directory, &name),
            media_profile: recording.media_profile.clone(),
            offer: params.sdp_offer,
            bandwidth: self.config.bandwidth,
        }
    }

    async fn negotiate(
        self: Arc<Self>,
        id: SessionId,
        request: PipelineRequest,
        cancel: watch::Receiver<bool>,
    ) {
        let engine = match self.engine.acquire().await {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("[{}] media server unavailable: {}", id, e);
                self.fail(&id, SessionError::Pipeline(e)).await;
                return;
            }
        };

        let channel = self.sessions.read().await.get(&id).map(Session::channel);
        let Some(channel) = channel else {
            log::info!("[{}] session ended before negotiation started", id);
            self.engine.release().await;
            return;
        };
        let link = Arc::new(SessionLink {
            manager: Arc::downgrade(&self),
            id: id.clone(),
            engine: engine.clone(),
            cancel,
            channel,
        });

        let mut handle = PipelineHandle::default();
        let outcome = pipeline::create_session(engine.clone(), &request, &mut handle, link).await;

        match outcome {
            Ok(answer) => {
                let committed = {
                    let mut sessions = self.sessions.write().await;
                    match sessions.get_mut(&id) {
                        Some(session) if session.state() == SessionState::Negotiating => {
                            session.pipeline = std::mem::take(&mut handle);
                            session.engine = Some(engine.clone());
                            if let Err(e) = session.transition(SessionState::Active) {
                                log::warn!("{}", e);
                            }
                            session.notify(ServerMessage::viewer_success(id.as_str(), answer));
                            true
                        }
                        _ => false,
                    }
                };
                if !committed {
                    log::info!("[{}] session ended during negotiation, discarding pipeline", id);
                    pipeline::teardown(engine.as_ref(), &mut handle).await;
                    self.engine.release().await;
                }
            }
            Err(PipelineError::Cancelled) => {
                log::info!("[{}] negotiation cancelled, discarding pipeline", id);
                pipeline::teardown(engine.as_ref(), &mut handle).await;
                self.engine.release().await;
            }
            Err(PipelineError::Engine(e)) => {
                log::error!("[{}] pipeline setup failed: {}", id, e);
                let session = self.detach(&id, SessionState::Failed).await;
                pipeline::teardown(engine.as_ref(), &mut handle).await;
                self.engine.release().await;
                if let Some(session) = session {
                    let message = SessionError::Pipeline(e).to_string();
                    session.notify(ServerMessage::viewer_error(Some(id.to_string()), message));
                }
            }
        }
    }

    /// Queue or forward a client candidate. Unknown sessions are ignored;
    /// returns `false` for them.
    pub async fn submit_candidate(&self, id: &SessionId, candidate: IceCandidate) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                if session.candidates.submit(candidate) == Submitted::Dropped {
                    log::debug!("[{}] candidate dropped", id);
                }
                true
            }
            None => {
                log::debug!("candidate for unknown session {}", id);
                false
            }
        }
    }

    /// Stop a session. Idempotent: returns `false` if it was already gone.
    pub async fn stop(&self, id: &SessionId) -> bool {
        let Some(session) = self.detach(id, SessionState::Stopped).await else {
            log::debug!("stop for unknown session {}", id);
            return false;
        };
        self.release_session(session).await;
        true
    }

    /// Mark a session FAILED, tear it down and tell the client why.
    pub async fn fail(&self, id: &SessionId, error: SessionError) {
        let Some(session) = self.detach(id, SessionState::Failed).await else {
            return;
        };
        let channel = session.channel();
        self.release_session(session).await;
        if let Some(tx) = channel.upgrade() {
            let _ = tx.send(ServerMessage::viewer_error(Some(id.to_string()), error.to_string()));
        }
    }

    /// Stop every session (server shutdown).
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Remove a session from the registry and move it to a terminal state.
    /// Any in-flight negotiation observes the cancel flag.
    async fn detach(&self, id: &SessionId, terminal: SessionState) -> Option<Session> {
        let mut session = self.sessions.write().await.remove(id)?;
        if let Err(e) = session.transition(terminal) {
            log::warn!("{}", e);
        }
        session.cancel.send_replace(true);
        session.candidates.close();
        Some(session)
    }

    /// Tear down a detached session's pipeline and return its engine lease.
    async fn release_session(&self, mut session: Session) {
        if let Some(engine) = session.engine.take() {
            pipeline::teardown(engine.as_ref(), &mut session.pipeline).await;
            self.engine.release().await;
        }
        log::info!("[{}] released", session.id);
    }

    pub async fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.sessions.read().await.get(id).map(Session::state)
    }

    pub async fn pending_candidates(&self, id: &SessionId) -> Option<usize> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.candidates.pending_len())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn engine_leases(&self) -> usize {
        self.engine.leases().await
    }

    pub async fn engine_connected(&self) -> bool {
        self.engine.is_connected().await
    }
}

/// Negotiation-time view of one session, handed to the pipeline.
struct SessionLink {
    manager: Weak<SessionManager>,
    id: SessionId,
    engine: Arc<dyn MediaEngine>,
    cancel: watch::Receiver<bool>,
    channel: mpsc::WeakUnboundedSender<ServerMessage>,
}

#[async_trait::async_trait]
impl NegotiationContext for SessionLink {
    fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    async fn sink_ready(&self, sink: &ObjectId) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            return false;
        };
        let mut sessions = manager.sessions.write().await;
        let Some(session) = sessions.get_mut(&self.id) else {
            return false;
        };
        let forwarder = candidates::spawn_forwarder(self.engine.clone(), sink.clone());
        let flushed = session.candidates.open(forwarder);
        if flushed > 0 {
            log::info!("[{}] flushed {} queued candidate(s) to {}", self.id, flushed, sink);
        }
        true
    }

    fn candidate_found(&self, candidate: IceCandidate) {
        if let Some(tx) = self.channel.upgrade() {
            let _ = tx.send(ServerMessage::ice_candidate(self.id.as_str(), candidate));
        }
    }

    async fn recording_failed(&self, error: EngineError) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let id = self.id.clone();
        // teardown aborts the task this hook runs on
        tokio::spawn(async move {
            manager.fail(&id, SessionError::Pipeline(error)).await;
        });
    }
}
