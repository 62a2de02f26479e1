//! Signaling message types exchanged with the browser.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`.

use crate::camera::{CameraRecord, VendorCode};
use crate::engine::IceCandidate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Client -> server ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "rtcConnect")]
    RtcConnect(ConnectRequest),
    #[serde(rename = "viewer")]
    Viewer(ViewRequest),
    #[serde(rename = "onIceCandidate")]
    OnIceCandidate(CandidateRequest),
    #[serde(rename = "stop")]
    Stop(StopRequest),
    #[serde(rename = "healthCheck")]
    HealthCheck(ConnectRequest),
}

impl ClientMessage {
    pub const EVENTS: [&'static str; 5] =
        ["rtcConnect", "viewer", "onIceCandidate", "stop", "healthCheck"];
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "streamingName", default)]
    pub streaming_name: String,
}

/// Accept a JSON string or number as text; UIs send numeric ids either way.
fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `viewer` payload. Every field is required; missing ones are reported by
/// name rather than failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRequest {
    #[serde(rename = "streamUUID", default)]
    pub stream_uuid: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub streaming_name: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub rtsp_ip: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub disaster_number: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub car_number: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub streaming_id: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub streaming_password: Option<String>,
    #[serde(default)]
    pub camera_code: Option<Value>,
    #[serde(default)]
    pub sdp_offer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRequest {
    #[serde(rename = "streamUUID")]
    pub stream_uuid: String,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(rename = "streamUUID")]
    pub stream_uuid: String,
}

// ── Server -> client ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "rtcConnectResponse")]
    RtcConnectResponse(ConnectResponse),
    #[serde(rename = "viewerResponse")]
    ViewerResponse(ViewerResponse),
    #[serde(rename = "iceCandidate")]
    IceCandidate(CandidateMessage),
    #[serde(rename = "healthCheckResponse")]
    HealthCheckResponse(HealthCheckResponse),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub response: ResponseKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<ConnectResult>,
}

/// Camera snapshot returned on a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResult {
    pub streaming_name: String,
    pub streaming_car_id: String,
    pub streaming_ip: String,
    pub streaming_id: String,
    pub streaming_password: String,
    pub camera_code: VendorCode,
    #[serde(rename = "authenticationId", skip_serializing_if = "Option::is_none", default)]
    pub authentication_id: Option<String>,
    #[serde(rename = "encodedPassword", skip_serializing_if = "Option::is_none", default)]
    pub encoded_password: Option<String>,
    #[serde(rename = "ptzPossible")]
    pub ptz_possible: bool,
    #[serde(rename = "streamUUID")]
    pub stream_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerResponse {
    pub response: ResponseKind,
    #[serde(rename = "sdpAnswer", skip_serializing_if = "Option::is_none", default)]
    pub sdp_answer: Option<String>,
    #[serde(rename = "streamUUID", skip_serializing_if = "Option::is_none", default)]
    pub stream_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMessage {
    #[serde(rename = "streamUUID")]
    pub stream_uuid: String,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub response: ResponseKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<CameraRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub response: ResponseKind,
    pub message: String,
}

pub const MESSAGE_OK: &str = "정상";

impl ServerMessage {
    pub fn connect_success(result: ConnectResult) -> Self {
        Self::RtcConnectResponse(ConnectResponse {
            response: ResponseKind::Success,
            message: MESSAGE_OK.to_string(),
            result: Some(result),
        })
    }

    pub fn connect_error(message: impl Into<String>) -> Self {
        Self::RtcConnectResponse(ConnectResponse {
            response: ResponseKind::Error,
            message: message.into(),
            result: None,
        })
    }

    pub fn viewer_success(stream_uuid: impl Into<String>, sdp_answer: String) -> Self {
        Self::ViewerResponse(ViewerResponse {
            response: ResponseKind::Success,
            sdp_answer: Some(sdp_answer),
            stream_uuid: Some(stream_uuid.into()),
            message: None,
        })
    }

    pub fn viewer_error(stream_uuid: Option<String>, message: impl Into<String>) -> Self {
        Self::ViewerResponse(ViewerResponse {
            response: ResponseKind::Error,
            sdp_answer: None,
            stream_uuid,
            message: Some(message.into()),
        })
    }

    pub fn ice_candidate(stream_uuid: impl Into<String>, candidate: IceCandidate) -> Self {
        Self::IceCandidate(CandidateMessage {
            stream_uuid: stream_uuid.into(),
            candidate,
        })
    }

    pub fn health(response: ResponseKind, message: impl Into<String>, result: Option<CameraRecord>) -> Self {
        Self::HealthCheckResponse(HealthCheckResponse {
            response,
            message: message.into(),
            result,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            response: ResponseKind::Error,
            message: message.into(),
        })
    }

    /// Error reply for a frame that failed to parse, on the response
    /// event matching the request when there is one.
    pub fn rejection(event: Option<&str>, message: impl Into<String>) -> Self {
        match event {
            Some("rtcConnect") => Self::connect_error(message),
            Some("viewer") => Self::viewer_error(None, message),
            Some("healthCheck") => Self::health(ResponseKind::Error, message, None),
            _ => Self::error(message),
        }
    }
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    /// Event name, when the frame named a known one.
    pub event: Option<String>,
    pub reason: String,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<ClientMessage, FrameError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| FrameError {
        event: None,
        reason: e.to_string(),
    })?;
    if !ClientMessage::EVENTS.contains(&raw.event.as_str()) {
        return Err(FrameError {
            event: None,
            reason: format!("unknown event '{}'", raw.event),
        });
    }
    serde_json::from_str(text).map_err(|e| FrameError {
        event: Some(raw.event),
        reason: e.to_string(),
    })
}
