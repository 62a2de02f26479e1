//! Carview: live vehicle camera viewing over WebRTC with server-side
//! recording.
//!
//! Browsers signal over a WebSocket; the server authenticates against the
//! camera firmware, builds an RTSP -> WebRTC + recorder pipeline on a
//! Kurento media server and relays ICE candidates in both directions.

pub mod camera;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod probe;
pub mod protocol;
pub mod recording;
pub mod retention;
pub mod server;
pub mod session;
pub mod signaling;
pub mod vendor;

pub use config::ServerConfig;
pub use session::SessionManager;
