//! TCP reachability probe used for admission control.

use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;

/// Outcome of a single probe. Refusals and timeouts are data, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub reachable: bool,
}

impl ProbeResult {
    pub fn status(&self) -> &'static str {
        if self.reachable {
            "open"
        } else {
            "closed"
        }
    }
}

/// Attempt a TCP connect to `host:port`, bounded by `timeout`.
///
/// The connect future and the timer race inside one `timeout` call, so the
/// result is produced exactly once whichever finishes first.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let reachable = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            log::debug!("probe {}:{} refused: {}", host, port, e);
            false
        }
        Err(_) => {
            log::debug!("probe {}:{} timed out after {:?}", host, port, timeout);
            false
        }
    };
    ProbeResult { reachable }
}
