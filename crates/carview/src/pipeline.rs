//! Media pipeline setup and teardown for one viewing session.
//!
//! [`create_session`] runs the engine calls strictly in order and records
//! every object it creates in the caller's [`PipelineHandle`], so whatever
//! exists can be torn down with [`teardown`] whether setup succeeded, failed
//! or was cancelled.

use crate::config::BandwidthLimits;
use crate::engine::{
    EngineError, EngineEvent, IceCandidate, MediaEngine, ObjectId, MEDIA_STATE_CONNECTED,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("negotiation cancelled")]
    Cancelled,
}

/// Everything needed to build one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub source_uri: String,
    pub recording_uri: String,
    pub media_profile: String,
    pub offer: String,
    pub bandwidth: BandwidthLimits,
}

/// Engine objects owned by a session. Unset until created.
#[derive(Debug, Default)]
pub struct PipelineHandle {
    pub pipeline: Option<ObjectId>,
    pub source: Option<ObjectId>,
    pub sink: Option<ObjectId>,
    pub recorder: Option<ObjectId>,
    pump: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn is_empty(&self) -> bool {
        self.pipeline.is_none()
            && self.source.is_none()
            && self.sink.is_none()
            && self.recorder.is_none()
            && self.pump.is_none()
    }
}

/// Session-side hooks invoked during and after setup.
#[async_trait::async_trait]
pub trait NegotiationContext: Send + Sync {
    /// Flag set when the session is stopped.
    fn cancellation(&self) -> watch::Receiver<bool>;

    fn is_cancelled(&self) -> bool {
        let cancelled = *self.cancellation().borrow();
        cancelled
    }

    /// The sink endpoint exists; flush queued client candidates onto it.
    /// Returns `false` if the session no longer exists.
    async fn sink_ready(&self, sink: &ObjectId) -> bool;

    /// The engine gathered a local candidate for the sink.
    fn candidate_found(&self, candidate: IceCandidate);

    /// `record` failed after the sink connected.
    async fn recording_failed(&self, error: EngineError);
}

/// True only on a real transition into CONNECTED.
pub fn is_connect_edge(old_state: &str, new_state: &str) -> bool {
    old_state != new_state && new_state == MEDIA_STATE_CONNECTED
}

fn ensure_live(ctx: &dyn NegotiationContext) -> Result<()> {
    if ctx.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Build the pipeline and return the SDP answer.
pub async fn create_session(
    engine: Arc<dyn MediaEngine>,
    request: &PipelineRequest,
    handle: &mut PipelineHandle,
    ctx: Arc<dyn NegotiationContext>,
) -> Result<String> {
    let pipeline = engine.create_pipeline().await?;
    handle.pipeline = Some(pipeline.clone());
    ensure_live(ctx.as_ref())?;

    let source = engine.create_player(&pipeline, &request.source_uri).await?;
    handle.source = Some(source.clone());
    ensure_live(ctx.as_ref())?;

    let sink = engine.create_webrtc(&pipeline).await?;
    handle.sink = Some(sink.clone());
    ensure_live(ctx.as_ref())?;

    if !ctx.sink_ready(&sink).await {
        return Err(PipelineError::Cancelled);
    }

    let recorder = engine
        .create_recorder(&pipeline, &request.recording_uri, &request.media_profile)
        .await?;
    handle.recorder = Some(recorder.clone());
    ensure_live(ctx.as_ref())?;

    handle.pump = Some(spawn_event_pump(
        engine.clone(),
        engine.events(),
        sink.clone(),
        recorder.clone(),
        ctx.clone(),
    ));

    engine.connect(&source, &recorder).await?;
    ensure_live(ctx.as_ref())?;
    engine.connect(&source, &sink).await?;
    ensure_live(ctx.as_ref())?;

    engine.set_bandwidth(&sink, &request.bandwidth).await?;
    ensure_live(ctx.as_ref())?;

    let answer = engine.process_offer(&sink, &request.offer).await?;
    ensure_live(ctx.as_ref())?;

    engine.gather_candidates(&sink).await?;
    ensure_live(ctx.as_ref())?;

    engine.play(&source).await?;
    ensure_live(ctx.as_ref())?;

    Ok(answer)
}

/// Forward sink events to the session until it is cancelled.
fn spawn_event_pump(
    engine: Arc<dyn MediaEngine>,
    mut events: broadcast::Receiver<EngineEvent>,
    sink: ObjectId,
    recorder: ObjectId,
    ctx: Arc<dyn NegotiationContext>,
) -> JoinHandle<()> {
    let mut cancel = ctx.cancellation();
    tokio::spawn(async move {
        if *cancel.borrow_and_update() {
            return;
        }
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(EngineEvent::IceCandidateFound { source, candidate }) if source == sink => {
                        ctx.candidate_found(candidate);
                    }
                    Ok(EngineEvent::MediaStateChanged { source, old_state, new_state })
                        if source == sink =>
                    {
                        log::debug!("{} media state {} -> {}", sink, old_state, new_state);
                        if is_connect_edge(&old_state, &new_state) {
                            log::info!("{} connected, starting recorder {}", sink, recorder);
                            if let Err(e) = engine.record(&recorder).await {
                                log::error!("Failed to start recorder {}: {}", recorder, e);
                                ctx.recording_failed(e).await;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("{} missed {} engine event(s)", sink, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Release engine objects: recorder stop, recorder release, sink release,
/// pipeline release. Failures are logged and do not stop later steps.
pub async fn teardown(engine: &dyn MediaEngine, handle: &mut PipelineHandle) {
    if let Some(pump) = handle.pump.take() {
        pump.abort();
    }
    if let Some(recorder) = handle.recorder.take() {
        if let Err(e) = engine.stop(&recorder).await {
            log::warn!("Failed to stop recorder {}: {}", recorder, e);
        }
        if let Err(e) = engine.release(&recorder).await {
            log::warn!("Failed to release recorder {}: {}", recorder, e);
        }
    }
    if let Some(sink) = handle.sink.take() {
        if let Err(e) = engine.release(&sink).await {
            log::warn!("Failed to release endpoint {}: {}", sink, e);
        }
    }
    // the player goes with its pipeline
    handle.source = None;
    if let Some(pipeline) = handle.pipeline.take() {
        if let Err(e) = engine.release(&pipeline).await {
            log::warn!("Failed to release pipeline {}: {}", pipeline, e);
        }
    }
}
