//! Capture session state machine
//!
//! `CaptureSession::apply` is a pure transition function: it takes the
//! current session and one event and returns the next session plus the
//! side effect the driver loop has to perform. It never touches the camera,
//! the detector or the network, so every gate can be tested without a
//! runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::detection::FaceBox;
use crate::error::{SubmissionFailure, TransientError};
use crate::lookup::Identity;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Camera streaming, nothing evaluated yet
    #[default]
    Idle,
    /// Evaluating frames, no qualifying face
    Detecting,
    /// Qualifying face, waiting out the cooldown
    Qualified,
    /// Lookup in flight
    Submitting,
    /// Patient identified; polling stopped
    Found,
    /// Last lookup had no match
    NotFound,
    /// Last lookup failed
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Detecting => "detecting",
            Phase::Qualified => "qualified",
            Phase::Submitting => "submitting",
            Phase::Found => "found",
            Phase::NotFound => "not_found",
            Phase::Failed => "failed",
        }
    }

    /// Status line shown on the kiosk
    pub fn message(&self) -> &'static str {
        match self {
            Phase::Idle => "Starting camera",
            Phase::Detecting => "No face detected, please look at the camera",
            Phase::Qualified => "Face detected, hold still",
            Phase::Submitting => "Searching for patient",
            Phase::Found => "Patient identified",
            Phase::NotFound => "Patient not found, trying again",
            Phase::Failed => "Search failed, trying again",
        }
    }

    /// Whether the polling loop has reached its end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Found)
    }
}

/// What the detector reported for one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    NoFace,
    Face {
        face: FaceBox,
        frame_width: u32,
        frame_height: u32,
    },
    DetectorError(String),
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// One polling tick, evaluated at `at`
    Tick { at: Instant, observation: Observation },
    LookupSucceeded(Identity),
    LookupMissed,
    LookupFailed(SubmissionFailure),
    /// User asked to search again
    Reset,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Submit this tick's frame to the lookup backend
    Submit,
    /// Stop polling and release the camera
    Halt,
}

/// Visibility and cooldown gates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub min_face_ratio: f32,
    pub cooldown: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_face_ratio: 0.2,
            cooldown: Duration::from_millis(5000),
        }
    }
}

impl Policy {
    /// Minimum box side, in pixels, for a frame of this size
    pub fn min_face_size(&self, frame_width: u32, frame_height: u32) -> f32 {
        frame_width.min(frame_height) as f32 * self.min_face_ratio
    }

    /// Both box sides must strictly exceed the minimum size
    pub fn is_visible(&self, face: &FaceBox, frame_width: u32, frame_height: u32) -> bool {
        let min_size = self.min_face_size(frame_width, frame_height);
        face.width > min_size && face.height > min_size
    }

    /// End of the cooldown window; submissions are allowed strictly after it
    pub fn cooldown_until(&self, last_submission_at: Option<Instant>) -> Option<Instant> {
        last_submission_at.map(|t| t + self.cooldown)
    }

    pub fn cooldown_elapsed(&self, last_submission_at: Option<Instant>, now: Instant) -> bool {
        match last_submission_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
        }
    }
}

/// Mutable session state, owned by exactly one driver loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSession {
    pub phase: Phase,
    /// Stamped with the tick instant that triggered the submission
    pub last_submission_at: Option<Instant>,
    pub matched_identity: Option<Identity>,
    pub last_error: Option<TransientError>,
    /// Submissions issued since the session was created
    pub submissions: u64,
}

/// Result of one transition
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub session: CaptureSession,
    pub action: Action,
}

impl Step {
    fn stay(session: CaptureSession) -> Self {
        Self {
            session,
            action: Action::None,
        }
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a lookup is outstanding
    pub fn in_flight(&self) -> bool {
        self.phase == Phase::Submitting
    }

    /// Pure transition function
    pub fn apply(mut self, event: Event, policy: &Policy) -> Step {
        match event {
            Event::Tick { at, observation } => {
                // The in-flight lookup owns the session until it resolves
                if self.phase == Phase::Submitting || self.phase.is_terminal() {
                    return Step::stay(self);
                }
                self.on_tick(at, observation, policy)
            }
            Event::LookupSucceeded(identity) => {
                if self.phase != Phase::Submitting {
                    return Step::stay(self);
                }
                self.phase = Phase::Found;
                self.matched_identity = Some(identity);
                self.last_error = None;
                Step {
                    session: self,
                    action: Action::Halt,
                }
            }
            Event::LookupMissed => {
                if self.phase == Phase::Submitting {
                    self.phase = Phase::NotFound;
                    self.last_error = None;
                }
                Step::stay(self)
            }
            Event::LookupFailed(failure) => {
                if self.phase == Phase::Submitting {
                    self.phase = Phase::Failed;
                    self.last_error = Some(TransientError::SubmissionFailure(failure));
                }
                Step::stay(self)
            }
            Event::Reset => {
                self.phase = Phase::Idle;
                self.matched_identity = None;
                self.last_error = None;
                Step::stay(self)
            }
        }
    }

    fn on_tick(mut self, at: Instant, observation: Observation, policy: &Policy) -> Step {
        // A completed observation supersedes any earlier transient error
        if !matches!(observation, Observation::DetectorError(_)) {
            self.last_error = None;
        }
        match observation {
            Observation::NoFace => {
                self.phase = Phase::Detecting;
                Step::stay(self)
            }
            Observation::DetectorError(message) => {
                self.phase = Phase::Detecting;
                self.last_error = Some(TransientError::DetectionFailure(message));
                Step::stay(self)
            }
            Observation::Face {
                face,
                frame_width,
                frame_height,
            } => {
                if !policy.is_visible(&face, frame_width, frame_height) {
                    self.phase = Phase::Detecting;
                    return Step::stay(self);
                }
                if !policy.cooldown_elapsed(self.last_submission_at, at) {
                    self.phase = Phase::Qualified;
                    return Step::stay(self);
                }

                self.phase = Phase::Submitting;
                self.last_submission_at = Some(match self.last_submission_at {
                    Some(prev) if prev > at => prev,
                    _ => at,
                });
                self.submissions += 1;
                Step {
                    session: self,
                    action: Action::Submit,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FRAME_W: u32 = 480;
    const FRAME_H: u32 = 640;

    fn policy(cooldown_ms: u64) -> Policy {
        Policy {
            min_face_ratio: 0.2,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    /// Square face whose side is `pct` percent of the frame width
    fn face_tick(at: Instant, pct: f32) -> Event {
        let side = FRAME_W as f32 * pct / 100.0;
        Event::Tick {
            at,
            observation: Observation::Face {
                face: FaceBox::new(10.0, 10.0, side, side),
                frame_width: FRAME_W,
                frame_height: FRAME_H,
            },
        }
    }

    fn identity() -> Identity {
        Identity {
            id: 7,
            name: "Joana Lima".into(),
            document: None,
            birth_date: None,
            distance: Some(0.3),
        }
    }

    fn submitting(at: Instant) -> CaptureSession {
        let step = CaptureSession::new().apply(face_tick(at, 50.0), &policy(3000));
        assert_eq!(step.action, Action::Submit);
        step.session
    }

    #[test]
    fn test_no_face_goes_to_detecting() {
        let step = CaptureSession::new().apply(
            Event::Tick {
                at: Instant::now(),
                observation: Observation::NoFace,
            },
            &policy(3000),
        );
        assert_eq!(step.session.phase, Phase::Detecting);
        assert_eq!(step.action, Action::None);
        assert!(step.session.last_error.is_none());
    }

    #[test]
    fn test_detector_error_is_recorded_but_not_fatal() {
        let step = CaptureSession::new().apply(
            Event::Tick {
                at: Instant::now(),
                observation: Observation::DetectorError("tensor shape".into()),
            },
            &policy(3000),
        );
        assert_eq!(step.session.phase, Phase::Detecting);
        assert_eq!(step.action, Action::None);
        assert!(matches!(
            step.session.last_error,
            Some(TransientError::DetectionFailure(_))
        ));
    }

    #[test]
    fn test_size_gate_is_strict() {
        let p = policy(3000);
        let min = p.min_face_size(FRAME_W, FRAME_H);
        assert_eq!(min, 96.0);
        assert!(!p.is_visible(&FaceBox::new(0.0, 0.0, 96.0, 200.0), FRAME_W, FRAME_H));
        assert!(!p.is_visible(&FaceBox::new(0.0, 0.0, 200.0, 96.0), FRAME_W, FRAME_H));
        assert!(p.is_visible(&FaceBox::new(0.0, 0.0, 96.5, 96.5), FRAME_W, FRAME_H));
    }

    #[test]
    fn test_three_tick_scenario() {
        // 15%, 25%, 25% at 0 / 300 / 600 ms with a 3 s cooldown
        let p = policy(3000);
        let t0 = Instant::now();
        let mut session = CaptureSession::new();
        let mut submitted_at = Vec::new();

        for (offset, pct) in [(0u64, 15.0f32), (300, 25.0), (600, 25.0)] {
            let at = t0 + Duration::from_millis(offset);
            let step = session.apply(face_tick(at, pct), &p);
            if step.action == Action::Submit {
                submitted_at.push(offset);
            }
            session = step.session;
            if session.phase == Phase::Submitting {
                // Lookup still pending at 600 ms would hide the cooldown gate;
                // resolve it so the third tick is judged on cooldown alone.
                session = session.apply(Event::LookupMissed, &p).session;
            }
        }

        assert_eq!(submitted_at, vec![300]);
        assert_eq!(session.submissions, 1);
        assert_eq!(session.phase, Phase::Qualified);
    }

    #[test]
    fn test_cooldown_measured_from_submission_time() {
        let p = policy(3000);
        let t0 = Instant::now();
        let session = submitting(t0)
            .apply(Event::LookupMissed, &p)
            .session;
        assert_eq!(session.phase, Phase::NotFound);
        assert_eq!(session.last_submission_at, Some(t0));
        assert_eq!(p.cooldown_until(session.last_submission_at), Some(t0 + Duration::from_millis(3000)));

        // Exactly at the boundary is still inside the window
        let at_boundary = session
            .clone()
            .apply(face_tick(t0 + Duration::from_millis(3000), 50.0), &p);
        assert_eq!(at_boundary.action, Action::None);
        assert_eq!(at_boundary.session.phase, Phase::Qualified);

        let after = session.apply(face_tick(t0 + Duration::from_millis(3300), 50.0), &p);
        assert_eq!(after.action, Action::Submit);
        assert_eq!(after.session.last_submission_at, Some(t0 + Duration::from_millis(3300)));
    }

    #[test]
    fn test_ticks_while_submitting_are_ignored() {
        let p = policy(0);
        let t0 = Instant::now();
        let session = submitting(t0);
        for offset in [300u64, 600, 900] {
            let step = session
                .clone()
                .apply(face_tick(t0 + Duration::from_millis(offset), 50.0), &p);
            assert_eq!(step.action, Action::None);
            assert_eq!(step.session, session);
        }
    }

    #[test]
    fn test_found_halts_and_stores_identity() {
        let p = policy(3000);
        let step = submitting(Instant::now()).apply(Event::LookupSucceeded(identity()), &p);
        assert_eq!(step.action, Action::Halt);
        assert_eq!(step.session.phase, Phase::Found);
        assert_eq!(step.session.matched_identity, Some(identity()));

        // Found is terminal for ticks
        let tick = step
            .session
            .clone()
            .apply(face_tick(Instant::now() + Duration::from_secs(10), 50.0), &p);
        assert_eq!(tick.action, Action::None);
        assert_eq!(tick.session.phase, Phase::Found);
    }

    #[test]
    fn test_failure_records_error_and_resumes() {
        let p = policy(3000);
        let t0 = Instant::now();
        let failed = submitting(t0)
            .apply(Event::LookupFailed(SubmissionFailure::Timeout(10_000)), &p)
            .session;
        assert_eq!(failed.phase, Phase::Failed);
        assert_eq!(
            failed.last_error,
            Some(TransientError::SubmissionFailure(SubmissionFailure::Timeout(10_000)))
        );

        let next = failed.apply(
            Event::Tick {
                at: t0 + Duration::from_millis(300),
                observation: Observation::NoFace,
            },
            &p,
        );
        assert_eq!(next.session.phase, Phase::Detecting);
        assert!(next.session.last_error.is_none());
    }

    #[test]
    fn test_detector_recovery_clears_error() {
        let p = policy(3000);
        let t0 = Instant::now();
        let errored = CaptureSession::new()
            .apply(
                Event::Tick {
                    at: t0,
                    observation: Observation::DetectorError("x".into()),
                },
                &p,
            )
            .session;
        assert!(errored.last_error.is_some());

        let no_face = errored.clone().apply(
            Event::Tick {
                at: t0 + Duration::from_millis(300),
                observation: Observation::NoFace,
            },
            &p,
        );
        assert_eq!(no_face.session.phase, Phase::Detecting);
        assert!(no_face.session.last_error.is_none());

        let small_face = errored.apply(face_tick(t0 + Duration::from_millis(300), 5.0), &p);
        assert_eq!(small_face.session.phase, Phase::Detecting);
        assert!(small_face.session.last_error.is_none());
    }

    #[test]
    fn test_miss_after_failure_clears_error() {
        let p = policy(0);
        let t0 = Instant::now();
        let failed = submitting(t0)
            .apply(Event::LookupFailed(SubmissionFailure::Lookup("503".into())), &p)
            .session;

        // Next qualifying face resubmits without the stale error
        let resubmit = failed.apply(face_tick(t0 + Duration::from_millis(300), 50.0), &p);
        assert_eq!(resubmit.action, Action::Submit);
        assert!(resubmit.session.last_error.is_none());

        let missed = resubmit.session.apply(Event::LookupMissed, &p).session;
        assert_eq!(missed.phase, Phase::NotFound);
        assert!(missed.last_error.is_none());
    }

    #[test]
    fn test_stale_lookup_results_are_ignored() {
        let p = policy(3000);
        let idle = CaptureSession::new();
        assert_eq!(idle.clone().apply(Event::LookupSucceeded(identity()), &p).session, idle);
        assert_eq!(idle.clone().apply(Event::LookupMissed, &p).session, idle);
        assert_eq!(
            idle.clone()
                .apply(Event::LookupFailed(SubmissionFailure::Lookup("x".into())), &p)
                .session,
            idle
        );
    }

    #[test]
    fn test_reset_clears_match_but_keeps_cooldown_stamp() {
        let p = policy(3000);
        let t0 = Instant::now();
        let found = submitting(t0).apply(Event::LookupSucceeded(identity()), &p).session;
        let reset = found.apply(Event::Reset, &p).session;
        assert_eq!(reset.phase, Phase::Idle);
        assert!(reset.matched_identity.is_none());
        assert!(reset.last_error.is_none());
        assert_eq!(reset.last_submission_at, Some(t0));
    }

    #[test]
    fn test_phase_messages_distinguish_waiting_from_no_face() {
        assert_ne!(Phase::Idle.message(), Phase::Detecting.message());
        assert_eq!(Phase::NotFound.as_str(), "not_found");
    }

    proptest! {
        #[test]
        fn prop_small_faces_never_submit(
            width in 1u32..2000,
            height in 1u32..2000,
            frac_w in 0.0f32..=1.0,
            frac_h in 0.0f32..=1.0,
        ) {
            let p = policy(0);
            let min = width.min(height) as f32 * 0.2;
            // At least one side at or below the gate
            let face = FaceBox::new(0.0, 0.0, min * frac_w, min * (1.0 + frac_h));
            let step = CaptureSession::new().apply(
                Event::Tick {
                    at: Instant::now(),
                    observation: Observation::Face { face, frame_width: width, frame_height: height },
                },
                &p,
            );
            prop_assert_eq!(step.action, Action::None);
            prop_assert_eq!(step.session.phase, Phase::Detecting);
        }

        #[test]
        fn prop_at_most_one_submission_in_flight(
            ticks in proptest::collection::vec((0u64..400, proptest::bool::ANY, 0u8..4), 1..60),
        ) {
            // Each entry: gap to previous tick, whether the face qualifies,
            // and which lookup result (if any) lands before the tick.
            let p = policy(1000);
            let t0 = Instant::now();
            let mut elapsed = 0u64;
            let mut session = CaptureSession::new();
            let mut outstanding = 0u32;
            let mut last_stamp: Option<Instant> = None;

            for (gap, qualifies, resolution) in ticks {
                if outstanding == 1 {
                    let event = match resolution {
                        0 => None,
                        1 => Some(Event::LookupMissed),
                        2 => Some(Event::LookupFailed(SubmissionFailure::Lookup("boom".into()))),
                        _ => Some(Event::LookupSucceeded(identity())),
                    };
                    if let Some(event) = event {
                        session = session.apply(event, &p).session;
                        outstanding = 0;
                    }
                }

                elapsed += gap;
                let pct = if qualifies { 50.0 } else { 5.0 };
                let step = session.apply(face_tick(t0 + Duration::from_millis(elapsed), pct), &p);
                if step.action == Action::Submit {
                    outstanding += 1;
                }
                prop_assert!(outstanding <= 1);
                prop_assert_eq!(step.session.in_flight(), outstanding == 1);

                if let (Some(prev), Some(now)) = (last_stamp, step.session.last_submission_at) {
                    prop_assert!(now >= prev);
                }
                last_stamp = step.session.last_submission_at;
                session = step.session;
            }
        }
    }
}
