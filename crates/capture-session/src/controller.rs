//! Capture session controller
//!
//! Owns the camera, the detector and the polling loop for one kiosk screen.
//! The loop runs as a single tokio task; lookups run as spawned tasks whose
//! results are fed back into the same task, so the transition function is
//! only ever called from one place.

use std::sync::Arc;
use std::time::Duration;

use camera_capture::{CameraStream, VideoFrame, VideoSource};
use chrono::Utc;
use metrics::counter;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::detection::{Detection, FaceDetector};
use crate::error::{SessionError, SubmissionFailure};
use crate::lookup::{IdentityLookup, LookupOutcome, Submission};
use crate::state::{Action, CaptureSession, Event, Observation};
use crate::status::SessionStatus;

/// Everything the loop needs exclusive access to. Handed to the task on
/// start and handed back when it exits.
struct Parts<V, D> {
    source: V,
    detector: D,
    session: CaptureSession,
}

struct Running<V, D> {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Parts<V, D>>,
}

/// Read-only context shared with the loop task
struct LoopContext<L> {
    session_id: Uuid,
    config: SessionConfig,
    lookup: Arc<L>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl<L> LoopContext<L> {
    fn publish(&self, session: &CaptureSession, running: bool) {
        publish(&self.status, SessionStatus::from_session(self.session_id, session, running));
    }
}

fn publish(tx: &watch::Sender<SessionStatus>, next: SessionStatus) {
    tx.send_if_modified(|current| {
        if current.same_state(&next) {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Camera-driven identity lookup for one screen
pub struct CaptureController<V, D, L>
where
    V: VideoSource,
    D: FaceDetector,
    L: IdentityLookup,
{
    session_id: Uuid,
    config: SessionConfig,
    lookup: Arc<L>,
    idle: Option<Parts<V, D>>,
    running: Option<Running<V, D>>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl<V, D, L> CaptureController<V, D, L>
where
    V: VideoSource,
    D: FaceDetector,
    L: IdentityLookup,
{
    /// Create a stopped controller
    pub fn new(
        config: SessionConfig,
        source: V,
        detector: D,
        lookup: Arc<L>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let session_id = Uuid::new_v4();
        let (status, _) = watch::channel(SessionStatus::initial(session_id));

        info!(
            "Capture session {} created (tick {}ms, cooldown {}ms)",
            session_id, config.tick_interval_ms, config.cooldown_ms
        );

        Ok(Self {
            session_id,
            config,
            lookup,
            idle: Some(Parts {
                source,
                detector,
                session: CaptureSession::new(),
            }),
            running: None,
            status: Arc::new(status),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Whether the polling loop is alive
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }

    /// The video source, while no loop holds it
    pub fn source(&self) -> Option<&V> {
        self.idle.as_ref().map(|p| &p.source)
    }

    /// Load the detector, acquire the camera and start polling.
    ///
    /// Model-load and camera failures are fatal for this attempt: they are
    /// published on the status channel and returned, and nothing is retried.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.reap().await?;
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        let mut parts = self.idle.take().ok_or(SessionError::Terminated)?;

        if !parts.detector.is_ready() {
            info!("Loading face detection models");
            if let Err(e) = parts.detector.load().await {
                return Err(self.fail_start(parts, SessionError::ModelLoadFailure(e.to_string())));
            }
        }

        let stream = match parts.source.acquire(&self.config.camera).await {
            Ok(stream) => stream,
            Err(e) => {
                return Err(self.fail_start(parts, SessionError::CameraUnavailable(e.to_string())));
            }
        };

        parts.session = std::mem::take(&mut parts.session)
            .apply(Event::Reset, &self.config.policy())
            .session;

        let ctx = LoopContext {
            session_id: self.session_id,
            config: self.config.clone(),
            lookup: Arc::clone(&self.lookup),
            status: Arc::clone(&self.status),
        };
        ctx.publish(&parts.session, true);

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(parts, stream, ctx, shutdown_rx));
        self.running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Stop polling and release the camera. Safe to call in any state,
    /// any number of times.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            debug!("Stopping capture session {}", self.session_id);
            let _ = self.join(running).await;
        }
    }

    /// "Search again": drop the match and restart the camera and polling
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        info!("Restarting capture session {}", self.session_id);
        self.stop().await;
        self.start().await
    }

    /// Collect a loop that ended on its own (patient found)
    async fn reap(&mut self) -> Result<(), SessionError> {
        let finished = self
            .running
            .as_ref()
            .map(|r| r.task.is_finished())
            .unwrap_or(false);
        if finished {
            if let Some(running) = self.running.take() {
                self.join(running).await?;
            }
        }
        Ok(())
    }

    async fn join(&mut self, running: Running<V, D>) -> Result<(), SessionError> {
        // The loop may already have exited; a closed receiver is fine.
        let _ = running.shutdown.send(());
        match running.task.await {
            Ok(parts) => {
                self.idle = Some(parts);
                Ok(())
            }
            Err(e) => {
                error!("Capture loop for {} terminated: {}", self.session_id, e);
                let err = SessionError::Terminated;
                publish(
                    &self.status,
                    SessionStatus::fatal(self.session_id, &CaptureSession::new(), &err),
                );
                Err(err)
            }
        }
    }

    fn fail_start(&mut self, parts: Parts<V, D>, err: SessionError) -> SessionError {
        error!("Capture session {} cannot start: {}", self.session_id, err);
        publish(
            &self.status,
            SessionStatus::fatal(self.session_id, &parts.session, &err),
        );
        self.idle = Some(parts);
        err
    }
}

async fn run_loop<V, D, L>(
    mut parts: Parts<V, D>,
    stream: CameraStream,
    ctx: LoopContext<L>,
    mut shutdown: oneshot::Receiver<()>,
) -> Parts<V, D>
where
    V: VideoSource,
    D: FaceDetector,
    L: IdentityLookup,
{
    let policy = ctx.config.policy();
    let mut interval = time::interval(ctx.config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let (result_tx, mut result_rx) = mpsc::channel::<Event>(1);
    let mut in_flight: Option<JoinHandle<()>> = None;
    let mut stream = Some(stream);

    info!("Capture loop {} running", ctx.session_id);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Capture loop {} shutting down", ctx.session_id);
                break;
            }
            Some(event) = result_rx.recv() => {
                in_flight = None;
                let step = std::mem::take(&mut parts.session).apply(event, &policy);
                parts.session = step.session;
                info!(
                    "Lookup resolved: {} (submissions: {})",
                    parts.session.phase.as_str(),
                    parts.session.submissions
                );

                if step.action == Action::Halt {
                    break;
                }
                ctx.publish(&parts.session, true);
            }
            at = interval.tick() => {
                if parts.session.in_flight() || parts.session.phase.is_terminal() {
                    continue;
                }
                let Some(active) = stream.as_ref() else {
                    break;
                };
                let Some(frame) = parts.source.current_frame(active) else {
                    debug!("No frame from camera yet");
                    continue;
                };
                counter!("checkin_ticks_total").increment(1);

                let (observation, detection) = observe(&mut parts.detector, &frame).await;
                let step = std::mem::take(&mut parts.session)
                    .apply(Event::Tick { at, observation }, &policy);
                parts.session = step.session;

                if step.action == Action::Submit {
                    match build_submission(&frame, detection, ctx.config.jpeg_quality) {
                        Ok(submission) => {
                            info!(
                                "Submitting frame {} for lookup (attempt {})",
                                frame.sequence, parts.session.submissions
                            );
                            counter!("checkin_submissions_total").increment(1);
                            in_flight = Some(spawn_lookup(
                                Arc::clone(&ctx.lookup),
                                submission,
                                ctx.config.lookup_timeout(),
                                result_tx.clone(),
                            ));
                        }
                        Err(failure) => {
                            warn!("Could not prepare submission: {}", failure);
                            parts.session = std::mem::take(&mut parts.session)
                                .apply(Event::LookupFailed(failure), &policy)
                                .session;
                        }
                    }
                }
                ctx.publish(&parts.session, true);
            }
        }
    }

    if let Some(task) = in_flight.take() {
        debug!("Abandoning in-flight lookup");
        task.abort();
    }
    if let Some(active) = stream.take() {
        parts.source.release(active);
        info!("Camera released for session {}", ctx.session_id);
    }
    ctx.publish(&parts.session, false);
    parts
}

async fn observe<D: FaceDetector>(
    detector: &mut D,
    frame: &VideoFrame,
) -> (Observation, Option<Detection>) {
    match detector.detect(frame).await {
        Ok(Some(detection)) => (
            Observation::Face {
                face: detection.bbox,
                frame_width: frame.width,
                frame_height: frame.height,
            },
            Some(detection),
        ),
        Ok(None) => (Observation::NoFace, None),
        Err(e) => {
            warn!("Detection failed on frame {}: {}", frame.sequence, e);
            (Observation::DetectorError(e.to_string()), None)
        }
    }
}

fn build_submission(
    frame: &VideoFrame,
    detection: Option<Detection>,
    jpeg_quality: u8,
) -> Result<Submission, SubmissionFailure> {
    let detection = detection
        .ok_or_else(|| SubmissionFailure::Encode("no detection for submitted frame".to_string()))?;
    let jpeg = frame
        .encode_jpeg(jpeg_quality)
        .map_err(|e| SubmissionFailure::Encode(e.to_string()))?;

    Ok(Submission {
        jpeg,
        face: detection.bbox,
        descriptor: detection.descriptor,
        frame_width: frame.width,
        frame_height: frame.height,
        captured_at: Utc::now(),
    })
}

fn spawn_lookup<L: IdentityLookup>(
    lookup: Arc<L>,
    submission: Submission,
    timeout: Option<Duration>,
    results: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let result = match timeout {
            Some(limit) => match time::timeout(limit, lookup.identify(&submission)).await {
                Ok(result) => result.map_err(|e| SubmissionFailure::Lookup(e.to_string())),
                Err(_) => Err(SubmissionFailure::Timeout(limit.as_millis() as u64)),
            },
            None => lookup
                .identify(&submission)
                .await
                .map_err(|e| SubmissionFailure::Lookup(e.to_string())),
        };

        let event = match result {
            Ok(LookupOutcome::Match(identity)) => {
                counter!("checkin_lookups_total", "outcome" => "found").increment(1);
                info!("Matched patient {} ({})", identity.id, identity.name);
                Event::LookupSucceeded(identity)
            }
            Ok(LookupOutcome::NotFound) => {
                counter!("checkin_lookups_total", "outcome" => "not_found").increment(1);
                Event::LookupMissed
            }
            Err(failure) => {
                counter!("checkin_lookups_total", "outcome" => "failed").increment(1);
                warn!("{}", failure);
                Event::LookupFailed(failure)
            }
        };
        debug!("Lookup took {:?}", started.elapsed());

        // The loop is gone if the session was stopped meanwhile
        let _ = results.send(event).await;
    })
}
