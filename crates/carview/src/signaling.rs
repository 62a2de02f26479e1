//! WebSocket signaling endpoint.
//!
//! One [`Connection`] per socket. Outbound messages go through an unbounded
//! channel drained by a writer task, so session callbacks never block on the
//! socket. Sessions created on a connection are stopped when it closes.

use crate::probe;
use crate::protocol::{
    parse_frame, CandidateRequest, ClientMessage, ConnectRequest, ResponseKind, ServerMessage,
    StopRequest, ViewRequest, MESSAGE_OK,
};
use crate::session::{SessionError, SessionId, SessionManager};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

const CAMERA_OFF: &str = "차량 카메라가 꺼져있음";

/// Signaling state of one client connection.
pub struct Connection {
    manager: Arc<SessionManager>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    owned: HashSet<SessionId>,
}

impl Connection {
    pub fn new(manager: Arc<SessionManager>, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            manager,
            tx,
            owned: HashSet::new(),
        }
    }

    /// Sessions created on this connection.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionId> {
        self.owned.iter()
    }

    fn reply(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            log::debug!("reply dropped, connection writer gone");
        }
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match parse_frame(text) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                log::warn!("Rejected frame: {}", e.reason);
                let error = SessionError::Protocol(e.reason);
                self.reply(ServerMessage::rejection(e.event.as_deref(), error.to_string()));
            }
        }
    }

    pub async fn dispatch(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::RtcConnect(req) => self.on_connect(req).await,
            ClientMessage::Viewer(req) => self.on_viewer(req).await,
            ClientMessage::OnIceCandidate(req) => self.on_candidate(req).await,
            ClientMessage::Stop(req) => self.on_stop(req).await,
            ClientMessage::HealthCheck(req) => self.on_health_check(req).await,
        }
    }

    async fn on_connect(&mut self, req: ConnectRequest) {
        match self.manager.request_connect(&req.streaming_name, &self.tx).await {
            Ok(grant) => {
                self.owned.insert(grant.session_id.clone());
                self.reply(ServerMessage::connect_success(grant.into_result()));
            }
            Err(e) => {
                log::info!("rtcConnect '{}' rejected: {}", req.streaming_name, e);
                self.reply(ServerMessage::connect_error(e.to_string()));
            }
        }
    }

    async fn on_viewer(&mut self, req: ViewRequest) {
        let Some(raw_id) = req.stream_uuid.as_deref().map(str::trim).filter(|s| !s.is_empty())
        else {
            let error = SessionError::MissingParameter("streamUUID");
            self.reply(ServerMessage::viewer_error(None, error.to_string()));
            return;
        };
        let id = SessionId::from(raw_id);
        let result = if self.owned.contains(&id) {
            self.manager.request_view(&id, &req).await
        } else {
            Err(SessionError::UnknownSession(id.to_string()))
        };
        if let Err(e) = result {
            log::info!("viewer for {} rejected: {}", id, e);
            if matches!(e, SessionError::UnknownSession(_)) {
                self.owned.remove(&id);
            }
            self.reply(ServerMessage::viewer_error(Some(id.to_string()), e.to_string()));
        }
    }

    async fn on_candidate(&mut self, req: CandidateRequest) {
        let id = SessionId::from(req.stream_uuid);
        if !self.owned.contains(&id) {
            log::debug!("candidate for foreign session {} ignored", id);
            return;
        }
        if !self.manager.submit_candidate(&id, req.candidate).await {
            // ended by the manager (pipeline or recorder failure)
            self.owned.remove(&id);
        }
    }

    async fn on_stop(&mut self, req: StopRequest) {
        let id = SessionId::from(req.stream_uuid);
        if !self.owned.remove(&id) {
            log::debug!("stop for foreign session {} ignored", id);
            return;
        }
        self.manager.stop(&id).await;
    }

    async fn on_health_check(&mut self, req: ConnectRequest) {
        let name = req.streaming_name.trim();
        let record = match self.manager.cameras().lookup(name).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.reply(ServerMessage::health(
                    ResponseKind::Error,
                    SessionError::NotFound.to_string(),
                    None,
                ));
                return;
            }
            Err(e) => {
                log::error!("[{}] camera registry lookup failed: {}", name, e);
                self.reply(ServerMessage::health(
                    ResponseKind::Error,
                    SessionError::NotFound.to_string(),
                    None,
                ));
                return;
            }
        };
        let camera = &self.manager.config().camera;
        let status = probe::probe(&record.streaming_ip, camera.rtsp_port, camera.probe_timeout()).await;
        let message = if status.reachable {
            ServerMessage::health(ResponseKind::Success, MESSAGE_OK, Some(record))
        } else {
            ServerMessage::health(ResponseKind::Error, CAMERA_OFF, Some(record))
        };
        self.reply(message);
    }

    /// Stop every session this connection created.
    pub async fn close(mut self) {
        for id in self.owned.drain() {
            if self.manager.stop(&id).await {
                log::info!("[{}] stopped on disconnect", id);
            }
        }
    }
}

/// Drive one upgraded WebSocket until the client goes away.
pub async fn handle_socket(socket: WebSocket, manager: Arc<SessionManager>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                log::debug!("Failed to send to client: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    log::debug!("Signaling connection opened");
    let mut connection = Connection::new(manager, tx);
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => connection.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) => {
                log::debug!("Client closed WebSocket connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::debug!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    connection.close().await;
    let _ = writer.await;
    log::debug!("Signaling connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraRecord, MemoryDirectory, VendorCode};
    use crate::config::ServerConfig;
    use crate::engine::mock::MockConnector;
    use crate::session::SessionState;
    use tokio::net::TcpListener;

    struct Setup {
        connection: Connection,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
        manager: Arc<SessionManager>,
        _listener: TcpListener,
    }

    async fn setup() -> Setup {
        // accepts probes; vendor 3 needs no firmware handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ServerConfig::default();
        config.camera.rtsp_port = listener.local_addr().unwrap().port();
        config.camera.probe_timeout_ms = 200;
        let cameras = Arc::new(MemoryDirectory::with_records([CameraRecord {
            streaming_name: "car-03".into(),
            streaming_car_id: "34나5678".into(),
            streaming_ip: "127.0.0.1".into(),
            streaming_id: "admin".into(),
            streaming_password: "1234".into(),
            camera_type: "seyeon".into(),
            camera_code: VendorCode::Seyeon,
        }]));
        let manager = SessionManager::new(config, cameras, Arc::new(MockConnector::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        Setup {
            connection: Connection::new(manager.clone(), tx),
            rx,
            manager,
            _listener: listener,
        }
    }

    fn json(message: ServerMessage) -> serde_json::Value {
        serde_json::to_value(message).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_event() {
        let mut s = setup().await;
        s.connection.handle_text("not json").await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["response"], "error");
    }

    #[tokio::test]
    async fn test_bad_payload_answers_on_matching_event() {
        let mut s = setup().await;
        s.connection
            .handle_text(r#"{"event":"viewer","data":"oops"}"#)
            .await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["event"], "viewerResponse");
        assert_eq!(reply["data"]["response"], "error");
    }

    #[tokio::test]
    async fn test_connect_registers_owned_session() {
        let mut s = setup().await;
        s.connection
            .handle_text(r#"{"event":"rtcConnect","data":{"streamingName":"car-03"}}"#)
            .await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["event"], "rtcConnectResponse");
        assert_eq!(reply["data"]["response"], "success");
        assert_eq!(reply["data"]["message"], MESSAGE_OK);
        assert_eq!(reply["data"]["result"]["ptzPossible"], false);

        let id = reply["data"]["result"]["streamUUID"].as_str().unwrap().to_string();
        assert!(s.connection.sessions().any(|owned| owned.as_str() == id));
        assert_eq!(
            s.manager.state(&SessionId::from(id.as_str())).await,
            Some(SessionState::Authenticated)
        );

        s.connection.close().await;
        assert_eq!(s.manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_viewer_without_stream_id() {
        let mut s = setup().await;
        s.connection
            .handle_text(r#"{"event":"viewer","data":{"streamingName":"car-03"}}"#)
            .await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["data"]["message"], "필수 파라미터 (streamUUID) 누락");
    }

    #[tokio::test]
    async fn test_viewer_for_foreign_session_is_rejected() {
        let mut s = setup().await;
        let (other_tx, _other_rx) = mpsc::unbounded_channel();
        let grant = s.manager.request_connect("car-03", &other_tx).await.unwrap();

        let frame = serde_json::json!({
            "event": "viewer",
            "data": { "streamUUID": grant.session_id.as_str() }
        });
        s.connection.handle_text(&frame.to_string()).await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["data"]["response"], "error");
        assert_eq!(
            s.manager.state(&grant.session_id).await,
            Some(SessionState::Authenticated)
        );

        // nor can it be stopped from here
        let stop = serde_json::json!({
            "event": "stop",
            "data": { "streamUUID": grant.session_id.as_str() }
        });
        s.connection.handle_text(&stop.to_string()).await;
        assert!(s.manager.state(&grant.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_stop_removes_session() {
        let mut s = setup().await;
        s.connection
            .handle_text(r#"{"event":"rtcConnect","data":{"streamingName":"car-03"}}"#)
            .await;
        let reply = json(s.rx.try_recv().unwrap());
        let id = reply["data"]["result"]["streamUUID"].as_str().unwrap().to_string();

        let stop = serde_json::json!({ "event": "stop", "data": { "streamUUID": id } });
        s.connection.handle_text(&stop.to_string()).await;
        s.connection.handle_text(&stop.to_string()).await;
        assert_eq!(s.manager.session_count().await, 0);
        assert_eq!(s.connection.sessions().count(), 0);
        // stop has no reply
        assert!(s.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sessions_ended_elsewhere_are_forgotten() {
        let mut s = setup().await;
        for _ in 0..2 {
            s.connection
                .handle_text(r#"{"event":"rtcConnect","data":{"streamingName":"car-03"}}"#)
                .await;
        }
        let ids: Vec<String> = (0..2)
            .map(|_| {
                let reply = json(s.rx.try_recv().unwrap());
                reply["data"]["result"]["streamUUID"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(s.connection.sessions().count(), 2);

        // the manager drops both, as it does after a failed pipeline
        for id in &ids {
            s.manager.stop(&SessionId::from(id.as_str())).await;
        }

        let candidate = serde_json::json!({
            "event": "onIceCandidate",
            "data": {
                "streamUUID": ids[0],
                "candidate": {"candidate": "candidate:1 1 UDP 1 10.0.0.1 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
            }
        });
        s.connection.handle_text(&candidate.to_string()).await;
        assert_eq!(s.connection.sessions().count(), 1);

        let viewer = serde_json::json!({
            "event": "viewer",
            "data": {
                "streamUUID": ids[1],
                "streamingName": "car-03",
                "rtspIp": "127.0.0.1",
                "disasterNumber": "D2024",
                "carNumber": "34나5678",
                "streamingId": "admin",
                "streamingPassword": "1234",
                "cameraCode": 3,
                "sdpOffer": "v=0"
            }
        });
        s.connection.handle_text(&viewer.to_string()).await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["event"], "viewerResponse");
        assert_eq!(reply["data"]["response"], "error");
        assert_eq!(s.connection.sessions().count(), 0);
    }

    #[tokio::test]
    async fn test_health_check() {
        let mut s = setup().await;
        s.connection
            .handle_text(r#"{"event":"healthCheck","data":{"streamingName":"car-03"}}"#)
            .await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["event"], "healthCheckResponse");
        assert_eq!(reply["data"]["response"], "success");
        assert_eq!(reply["data"]["message"], MESSAGE_OK);
        assert_eq!(reply["data"]["result"]["streaming_ip"], "127.0.0.1");

        s.connection
            .handle_text(r#"{"event":"healthCheck","data":{"streamingName":"nope"}}"#)
            .await;
        let reply = json(s.rx.try_recv().unwrap());
        assert_eq!(reply["data"]["response"], "error");
        assert_eq!(reply["data"]["message"], "차량 정보 없음");
        assert!(reply["data"].get("result").is_none());
    }
}
