//! Client ICE candidates for one session.
//!
//! Candidates that arrive before the sink endpoint exists are buffered. Once
//! the sink is created the buffer is flushed in arrival order and the queue
//! switches to pass-through for the rest of the session.

use crate::engine::{IceCandidate, MediaEngine, ObjectId};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    Forwarded,
    Dropped,
}

#[derive(Debug)]
pub enum CandidateQueue {
    Pending(Vec<IceCandidate>),
    Open(mpsc::UnboundedSender<IceCandidate>),
    Closed,
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::Pending(Vec::new())
    }
}

impl CandidateQueue {
    pub fn submit(&mut self, candidate: IceCandidate) -> Submitted {
        match self {
            Self::Pending(queue) => {
                queue.push(candidate);
                Submitted::Queued
            }
            Self::Open(tx) => {
                if tx.send(candidate).is_ok() {
                    Submitted::Forwarded
                } else {
                    Submitted::Dropped
                }
            }
            Self::Closed => Submitted::Dropped,
        }
    }

    /// Attach the sink's forwarder and flush the buffer into it.
    /// Returns how many buffered candidates were flushed.
    pub fn open(&mut self, tx: mpsc::UnboundedSender<IceCandidate>) -> usize {
        let queued = match std::mem::replace(self, Self::Closed) {
            Self::Pending(queued) => queued,
            Self::Open(existing) => {
                log::warn!("candidate queue already open");
                *self = Self::Open(existing);
                return 0;
            }
            Self::Closed => return 0,
        };
        let flushed = queued.len();
        for candidate in queued {
            let _ = tx.send(candidate);
        }
        *self = Self::Open(tx);
        flushed
    }

    pub fn close(&mut self) {
        *self = Self::Closed;
    }

    pub fn pending_len(&self) -> usize {
        match self {
            Self::Pending(queue) => queue.len(),
            _ => 0,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Spawn a task that hands candidates to `endpoint` one at a time, in order.
/// The task ends when the returned sender is dropped.
pub fn spawn_forwarder(
    engine: Arc<dyn MediaEngine>,
    endpoint: ObjectId,
) -> mpsc::UnboundedSender<IceCandidate> {
    let (tx, mut rx) = mpsc::unbounded_channel::<IceCandidate>();
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            if let Err(e) = engine.add_ice_candidate(&endpoint, &candidate).await {
                log::warn!("addIceCandidate on {} failed: {}", endpoint, e);
            }
        }
        log::debug!("candidate forwarder for {} finished", endpoint);
    });
    tx
}
