//! Server configuration loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the carview server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/WebSocket listen address
    pub listen: String,
    pub engine: EngineConfig,
    pub camera: CameraConfig,
    pub recording: RecordingConfig,
    pub bandwidth: BandwidthLimits,
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8443".to_string(),
            engine: EngineConfig::default(),
            camera: CameraConfig::default(),
            recording: RecordingConfig::default(),
            bandwidth: BandwidthLimits::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Media engine (Kurento) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON-RPC WebSocket endpoint of the media server
    pub ws_uri: String,
    /// Upper bound for a single RPC round trip
    pub request_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_uri: "ws://localhost:8888/kurento".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How cameras are reached on the vehicle network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Streaming port probed for admission and used in the source URI
    pub rtsp_port: u16,
    /// Firmware HTTP port (authentication and PTZ)
    pub http_port: u16,
    /// Stream path appended to the RTSP source URI
    pub rtsp_path: String,
    pub probe_timeout_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            rtsp_port: 1935,
            http_port: 80,
            rtsp_path: "/live/cctv002.stream".to_string(),
            probe_timeout_ms: 500,
            http_timeout_ms: 5_000,
        }
    }
}

impl CameraConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Where and how the engine writes recordings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory as seen by the media server (used in `file://` URIs)
    pub directory: String,
    pub extension: String,
    pub media_profile: String,
    /// Age after which clips are swept
    pub retention_hours: u64,
    /// Cron expression for the retention sweep (5 or 6 fields)
    pub sweep_cron: String,
    /// Local path of the recordings directory; enables listing, serving and the sweep
    pub serve_directory: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: "/recorders".to_string(),
            extension: "webm".to_string(),
            media_profile: "WEBM_VIDEO_ONLY".to_string(),
            retention_hours: 48,
            sweep_cron: "0 0 * * *".to_string(),
            serve_directory: None,
        }
    }
}

impl RecordingConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }
}

/// Video bandwidth bounds applied to the browser-facing endpoint, in kbps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthLimits {
    pub min_send_kbps: u32,
    pub max_send_kbps: u32,
    pub min_recv_kbps: u32,
    pub max_recv_kbps: u32,
}

impl Default for BandwidthLimits {
    fn default() -> Self {
        Self {
            min_send_kbps: 500,
            max_send_kbps: 2000,
            min_recv_kbps: 500,
            max_recv_kbps: 2000,
        }
    }
}

/// Camera registry storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// YAML file of camera records; in-memory only when unset
    pub path: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_field_deployment() {
        let config = ServerConfig::default();
        assert_eq!(config.camera.rtsp_port, 1935);
        assert_eq!(config.camera.probe_timeout(), Duration::from_millis(500));
        assert_eq!(config.engine.ws_uri, "ws://localhost:8888/kurento");
        assert_eq!(config.recording.extension, "webm");
        assert_eq!(config.recording.retention(), Duration::from_secs(48 * 3600));
        assert_eq!(config.bandwidth.max_send_kbps, 2000);
        assert_eq!(config.bandwidth.min_recv_kbps, 500);
    }

    #[test]
    fn test_parse_partial_yaml_keeps_defaults() {
        let yaml = r#"
listen: "127.0.0.1:9000"
engine:
  ws_uri: "ws://kms:8888/kurento"
camera:
  probe_timeout_ms: 250
recording:
  serve_directory: /srv/recorders
"#;
        let config = ServerConfig::parse(yaml).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.engine.ws_uri, "ws://kms:8888/kurento");
        assert_eq!(config.engine.request_timeout_ms, 30_000);
        assert_eq!(config.camera.probe_timeout_ms, 250);
        assert_eq!(config.camera.rtsp_port, 1935);
        assert_eq!(
            config.recording.serve_directory,
            Some(PathBuf::from("/srv/recorders"))
        );
        assert_eq!(config.recording.directory, "/recorders");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = ServerConfig::parse("camera: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = ServerConfig::from_file("/nonexistent/carview.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
