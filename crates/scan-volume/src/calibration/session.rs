//! Interactive calibration session.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{calibrate_at, now_ms, CalibrationFrame, CalibrationResult, FrameObservation, ReferenceObject};
use crate::error::CalibrationFailure;

/// Viewing angle of a calibration frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureAngle {
    Frontal,
    Left,
    Top,
}

impl CaptureAngle {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureAngle::Frontal => "frontal",
            CaptureAngle::Left => "left",
            CaptureAngle::Top => "top",
        }
    }
}

/// Angles a session walks through, in order.
pub const REQUIRED_ANGLES: [CaptureAngle; 3] =
    [CaptureAngle::Frontal, CaptureAngle::Left, CaptureAngle::Top];

/// Where a session is.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    Idle,
    CapturingFrame {
        /// Angle the next frame is expected from.
        angle: CaptureAngle,
        /// Frames captured so far.
        progress: usize,
        total: usize,
    },
    /// Every angle captured; waiting for [`CalibrationSession::process`].
    Processing,
    Completed(CalibrationResult),
    Failed(CalibrationFailure),
}

impl CalibrationState {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationState::Idle => "idle",
            CalibrationState::CapturingFrame { .. } => "capturing",
            CalibrationState::Processing => "processing",
            CalibrationState::Completed(_) => "completed",
            CalibrationState::Failed(_) => "failed",
        }
    }
}

/// Drives one reference object through the required angles.
///
/// ```
/// use scan_volume::calibration::{CalibrationSession, CalibrationState, ReferenceObject};
///
/// let mut session = CalibrationSession::new();
/// session.select_reference(ReferenceObject::credit_card());
/// assert!(matches!(
///     session.state(),
///     CalibrationState::CapturingFrame { progress: 0, total: 3, .. }
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    reference: Option<ReferenceObject>,
    frames: Vec<CalibrationFrame>,
    state: CalibrationState,
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationSession {
    pub fn new() -> Self {
        Self {
            reference: None,
            frames: Vec::with_capacity(REQUIRED_ANGLES.len()),
            state: CalibrationState::Idle,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn reference(&self) -> Option<&ReferenceObject> {
        self.reference.as_ref()
    }

    pub fn frames(&self) -> &[CalibrationFrame] {
        &self.frames
    }

    /// Choose the reference object and start capturing. Discards any
    /// frames from an earlier run.
    pub fn select_reference(&mut self, reference: ReferenceObject) {
        debug!(reference = %reference.id, "Calibration reference selected");
        self.reference = Some(reference);
        self.frames.clear();
        self.state = CalibrationState::CapturingFrame {
            angle: REQUIRED_ANGLES[0],
            progress: 0,
            total: REQUIRED_ANGLES.len(),
        };
    }

    /// Record the frame for the current angle.
    pub fn capture(&mut self, observation: FrameObservation) -> Result<&CalibrationState, CalibrationFailure> {
        let (angle, progress, total) = match self.state {
            CalibrationState::CapturingFrame {
                angle,
                progress,
                total,
            } => (angle, progress, total),
            ref other => {
                return Err(CalibrationFailure::CaptureOutOfOrder {
                    state: other.name(),
                })
            }
        };
        let reference = self
            .reference
            .as_ref()
            .ok_or(CalibrationFailure::NoObjectSelected)?;

        let frame = CalibrationFrame::new(reference, angle, observation);
        debug!(
            angle = angle.name(),
            estimate = frame.scale_factor_estimate(),
            "Calibration frame captured"
        );
        self.frames.push(frame);

        let progress = progress + 1;
        self.state = match REQUIRED_ANGLES.get(progress) {
            Some(&next) if progress < total => CalibrationState::CapturingFrame {
                angle: next,
                progress,
                total,
            },
            _ => CalibrationState::Processing,
        };
        Ok(&self.state)
    }

    /// Compute the result from the captured frames.
    pub fn process(&mut self) -> Result<CalibrationResult, CalibrationFailure> {
        self.process_at(now_ms())
    }

    /// Like [`process`](Self::process) with an explicit completion time.
    pub fn process_at(&mut self, timestamp_ms: u64) -> Result<CalibrationResult, CalibrationFailure> {
        let outcome = match (&self.reference, &self.state) {
            (None, _) => Err(CalibrationFailure::NoObjectSelected),
            (Some(_), CalibrationState::CapturingFrame { progress, total, .. }) => {
                Err(CalibrationFailure::InsufficientFrames {
                    captured: *progress,
                    required: *total,
                })
            }
            (Some(reference), CalibrationState::Processing) => {
                calibrate_at(reference, &self.frames, timestamp_ms)
            }
            (Some(_), other) => Err(CalibrationFailure::CaptureOutOfOrder {
                state: other.name(),
            }),
        };

        match &outcome {
            Ok(result) => {
                info!(scale_factor = result.scale_factor, "Calibration session completed");
                self.state = CalibrationState::Completed(result.clone());
            }
            Err(reason) => {
                warn!(code = reason.error_code().as_str(), %reason, "Calibration session failed");
                self.state = CalibrationState::Failed(reason.clone());
            }
        }
        outcome
    }

    /// Back to `Idle`, forgetting the reference and frames.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::{bar, observation};
    use approx::assert_relative_eq;

    #[test]
    fn test_full_session() {
        let mut session = CalibrationSession::new();
        assert_eq!(session.state(), &CalibrationState::Idle);
        session.select_reference(bar());

        session.capture(observation(0.95, Some(0.5))).unwrap();
        assert_eq!(
            session.state(),
            &CalibrationState::CapturingFrame {
                angle: CaptureAngle::Left,
                progress: 1,
                total: 3
            }
        );
        session.capture(observation(1.0, Some(0.5))).unwrap();
        let state = session.capture(observation(1.5, Some(0.5))).unwrap();
        assert_eq!(state, &CalibrationState::Processing);

        let result = session.process_at(7).unwrap();
        assert_relative_eq!(result.scale_factor, 0.975, epsilon = 1e-12);
        assert_eq!(result.frame_count, 3);
        assert!(matches!(session.state(), CalibrationState::Completed(_)));
        assert_eq!(session.frames()[2].angle(), CaptureAngle::Top);
    }

    #[test]
    fn test_process_without_reference() {
        let mut session = CalibrationSession::new();
        assert_eq!(
            session.process_at(0).unwrap_err(),
            CalibrationFailure::NoObjectSelected
        );
        assert!(matches!(session.state(), CalibrationState::Failed(_)));
    }

    #[test]
    fn test_process_too_early() {
        let mut session = CalibrationSession::new();
        session.select_reference(bar());
        session.capture(observation(0.9, Some(0.5))).unwrap();
        assert_eq!(
            session.process_at(0).unwrap_err(),
            CalibrationFailure::InsufficientFrames {
                captured: 1,
                required: 3
            }
        );
    }

    #[test]
    fn test_capture_out_of_order() {
        let mut session = CalibrationSession::new();
        let err = session.capture(observation(0.9, Some(0.5))).unwrap_err();
        assert_eq!(err, CalibrationFailure::CaptureOutOfOrder { state: "idle" });

        session.select_reference(bar());
        for _ in 0..3 {
            session.capture(observation(0.9, Some(0.5))).unwrap();
        }
        let err = session.capture(observation(0.9, Some(0.5))).unwrap_err();
        assert_eq!(
            err,
            CalibrationFailure::CaptureOutOfOrder {
                state: "processing"
            }
        );
    }

    #[test]
    fn test_reset() {
        let mut session = CalibrationSession::new();
        session.select_reference(bar());
        session.capture(observation(0.9, Some(0.5))).unwrap();
        session.reset();
        assert_eq!(session.state(), &CalibrationState::Idle);
        assert!(session.frames().is_empty());
        assert!(session.reference().is_none());
    }
}
