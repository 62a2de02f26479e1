//! Viewing sessions: identifiers, lifecycle states and errors.

pub mod candidates;
pub mod manager;

pub use manager::{ConnectGrant, SessionManager};

use crate::camera::{CameraRecord, VendorCode};
use crate::engine::{EngineError, MediaEngine};
use crate::pipeline::PipelineHandle;
use crate::protocol::{ServerMessage, ViewRequest};
use crate::vendor::AuthArtifacts;
use candidates::CandidateQueue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors reported back to the client. The display text is what the UI shows.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("차량 정보 없음")]
    NotFound,
    #[error("{0} 카메라가 꺼져있음")]
    Unreachable(String),
    #[error("카메라 인증 실패: {0}")]
    AuthFailed(String),
    #[error("필수 파라미터 ({0}) 누락")]
    MissingParameter(&'static str),
    #[error("잘못된 파라미터 ({0})")]
    InvalidParameter(&'static str),
    #[error("미디어 파이프라인 오류: {0}")]
    Pipeline(#[from] EngineError),
    #[error("잘못된 메시지 형식: {0}")]
    Protocol(String),
    #[error("존재하지 않는 스트림 세션: {0}")]
    UnknownSession(String),
    #[error("스트림 세션 상태 오류: {id} ({state})")]
    InvalidState { id: String, state: SessionState },
}

/// Process-unique session identifier (`streamUUID` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Requested,
    Authenticating,
    Authenticated,
    Negotiating,
    Active,
    Stopped,
    Failed,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::Authenticating => 1,
            Self::Authenticated => 2,
            Self::Negotiating => 3,
            Self::Active => 4,
            Self::Stopped | Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Forward-only, with STOPPED/FAILED reachable from anywhere non-terminal.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Requested => "REQUESTED",
            Self::Authenticating => "AUTHENTICATING",
            Self::Authenticated => "AUTHENTICATED",
            Self::Negotiating => "NEGOTIATING",
            Self::Active => "ACTIVE",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Camera record as it was at authentication time, plus handshake output.
#[derive(Debug, Clone)]
pub struct CameraSnapshot {
    pub record: CameraRecord,
    pub auth: AuthArtifacts,
}

/// Validated `viewer` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewParams {
    pub streaming_name: String,
    pub rtsp_ip: String,
    pub disaster_number: String,
    pub car_number: String,
    pub streaming_id: String,
    pub streaming_password: String,
    pub camera_code: VendorCode,
    pub sdp_offer: String,
}

fn required(value: &Option<String>, field: &'static str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(SessionError::MissingParameter(field)),
    }
}

/// A required field that becomes part of a recording file name.
fn name_part(value: &Option<String>, field: &'static str) -> Result<String> {
    let value = required(value, field)?;
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(SessionError::InvalidParameter(field));
    }
    Ok(value)
}

fn camera_code(value: &Option<Value>) -> Result<VendorCode> {
    let code = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    code.map(VendorCode::from)
        .ok_or(SessionError::MissingParameter("cameraCode"))
}

impl ViewParams {
    /// Check every mandatory field, reporting the first missing one.
    pub fn from_request(req: &ViewRequest) -> Result<Self> {
        Ok(Self {
            streaming_name: name_part(&req.streaming_name, "streamingName")?,
            rtsp_ip: required(&req.rtsp_ip, "rtspIp")?,
            disaster_number: name_part(&req.disaster_number, "disasterNumber")?,
            car_number: name_part(&req.car_number, "carNumber")?,
            streaming_id: required(&req.streaming_id, "streamingId")?,
            streaming_password: required(&req.streaming_password, "streamingPassword")?,
            camera_code: camera_code(&req.camera_code)?,
            sdp_offer: required(&req.sdp_offer, "sdpOffer")?,
        })
    }
}

/// One viewing session. Owned and mutated only by [`SessionManager`].
pub struct Session {
    pub id: SessionId,
    state: SessionState,
    pub camera: CameraSnapshot,
    pub(crate) pipeline: PipelineHandle,
    pub(crate) candidates: CandidateQueue,
    channel: mpsc::WeakUnboundedSender<ServerMessage>,
    pub(crate) cancel: watch::Sender<bool>,
    /// Set once the pipeline is committed; the session then holds an engine lease.
    pub(crate) engine: Option<Arc<dyn MediaEngine>>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        camera: CameraSnapshot,
        channel: mpsc::WeakUnboundedSender<ServerMessage>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id,
            state: SessionState::Authenticated,
            camera,
            pipeline: PipelineHandle::default(),
            candidates: CandidateQueue::default(),
            channel,
            cancel,
            engine: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidState {
                id: self.id.to_string(),
                state: self.state,
            });
        }
        log::info!("[{}] {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    pub(crate) fn channel(&self) -> mpsc::WeakUnboundedSender<ServerMessage> {
        self.channel.clone()
    }

    /// Send to the owning connection if it is still open.
    pub(crate) fn notify(&self, message: ServerMessage) -> bool {
        match self.channel.upgrade() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_request() -> ViewRequest {
        ViewRequest {
            stream_uuid: Some("abc".into()),
            streaming_name: Some("car-01".into()),
            rtsp_ip: Some("10.0.0.7".into()),
            disaster_number: Some("2024001".into()),
            car_number: Some("12가3456".into()),
            streaming_id: Some("admin".into()),
            streaming_password: Some("1234".into()),
            camera_code: Some(json!(1)),
            sdp_offer: Some("v=0".into()),
        }
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Authenticated.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Active));
        assert!(Active.can_transition_to(Stopped));
        assert!(Authenticated.can_transition_to(Failed));
        assert!(!Negotiating.can_transition_to(Authenticated));
        assert!(!Active.can_transition_to(Negotiating));
        assert!(!Stopped.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Stopped));
    }

    #[test]
    fn test_view_params_complete() {
        let params = ViewParams::from_request(&full_request()).unwrap();
        assert_eq!(params.camera_code, VendorCode::Kedacom);
        assert_eq!(params.car_number, "12가3456");
    }

    #[test]
    fn test_view_params_reports_missing_field() {
        let mut req = full_request();
        req.car_number = None;
        let err = ViewParams::from_request(&req).unwrap_err();
        assert_eq!(err.to_string(), "필수 파라미터 (carNumber) 누락");

        let mut req = full_request();
        req.rtsp_ip = Some("   ".into());
        assert!(matches!(
            ViewParams::from_request(&req),
            Err(SessionError::MissingParameter("rtspIp"))
        ));

        let mut req = full_request();
        req.camera_code = Some(json!(""));
        assert!(matches!(
            ViewParams::from_request(&req),
            Err(SessionError::MissingParameter("cameraCode"))
        ));
    }

    #[test]
    fn test_view_params_rejects_path_in_name_fields() {
        let mut req = full_request();
        req.streaming_name = Some("other/../../../etc".into());
        assert!(matches!(
            ViewParams::from_request(&req),
            Err(SessionError::InvalidParameter("streamingName"))
        ));

        let mut req = full_request();
        req.car_number = Some("../../var/lib/x".into());
        let err = ViewParams::from_request(&req).unwrap_err();
        assert_eq!(err.to_string(), "잘못된 파라미터 (carNumber)");

        let mut req = full_request();
        req.disaster_number = Some("D2024\\x".into());
        assert!(matches!(
            ViewParams::from_request(&req),
            Err(SessionError::InvalidParameter("disasterNumber"))
        ));

        // other fields are not used in file names
        let mut req = full_request();
        req.streaming_password = Some("a/b..c".into());
        assert!(ViewParams::from_request(&req).is_ok());
    }

    #[test]
    fn test_view_params_camera_code_as_string() {
        let mut req = full_request();
        req.camera_code = Some(json!("2"));
        assert_eq!(
            ViewParams::from_request(&req).unwrap().camera_code,
            VendorCode::Innodep
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(SessionError::NotFound.to_string(), "차량 정보 없음");
        assert_eq!(
            SessionError::Unreachable("car-01".into()).to_string(),
            "car-01 카메라가 꺼져있음"
        );
        let err = SessionError::InvalidState {
            id: "abc".into(),
            state: SessionState::Active,
        };
        assert_eq!(err.to_string(), "스트림 세션 상태 오류: abc (ACTIVE)");
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
