//! Scale and depth-bias calibration against a reference object.
//!
//! A calibration run looks at an object of known size from a few angles.
//! Each frame yields a scale estimate (known size over observed size); the
//! valid estimates are averaged into a single scale factor, and frames with
//! a depth sample feed a linear fit of the depth sensor's bias.
//!
//! # Example
//!
//! ```
//! use nalgebra::Matrix4;
//! use scan_volume::calibration::{
//!     calibrate_at, CalibrationFrame, CameraIntrinsics, CaptureAngle, FrameObservation,
//!     ReferenceObject,
//! };
//!
//! let reference = ReferenceObject::new("bar", "Test bar", 0.1, 0.02);
//! let intrinsics = CameraIntrinsics::new(1000.0, 1000.0, 320.0, 240.0);
//! let observe = |pixel_width: f64| FrameObservation {
//!     contour: Vec::new(),
//!     pixel_width,
//!     pixel_height: 40.0,
//!     camera_transform: Matrix4::identity(),
//!     intrinsics,
//!     depth_sample: Some(0.5),
//! };
//!
//! let frames = vec![
//!     CalibrationFrame::new(&reference, CaptureAngle::Frontal, observe(200.0)),
//!     CalibrationFrame::new(&reference, CaptureAngle::Left, observe(200.0)),
//! ];
//! let result = calibrate_at(&reference, &frames, 0).unwrap();
//! assert_eq!(result.scale_factor, 1.0);
//! ```

mod reference;
mod regression;
mod session;
mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CalibrationFailure, VolumeError};

pub use reference::{BuiltinCatalog, ReferenceCatalog, ReferenceObject};
pub use regression::{fit_depth_bias, BiasFit, DepthBias};
pub use session::{CalibrationSession, CalibrationState, CaptureAngle, REQUIRED_ANGLES};
pub use store::{
    CalibrationPersistence, CalibrationStore, JsonFilePersistence, MemoryPersistence,
    StoredCalibration,
};

/// How long a calibration stays usable: 30 days.
pub const CALIBRATION_VALIDITY_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Minimum number of frames with a valid scale estimate.
pub const MIN_VALID_FRAMES: usize = 2;

/// Largest scale estimate accepted; anything above is a detection error.
pub const MAX_SCALE_ESTIMATE: f64 = 1.0;

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Horizontal focal length.
    pub fx: f64,
    /// Vertical focal length.
    pub fy: f64,
    /// Principal point, x.
    pub cx: f64,
    /// Principal point, y.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }
}

/// What the detector reported for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    /// Detected outline in pixel coordinates.
    #[serde(default)]
    pub contour: Vec<[f64; 2]>,
    /// Width of the detected object in pixels.
    pub pixel_width: f64,
    /// Height of the detected object in pixels.
    pub pixel_height: f64,
    /// Camera-to-world transform at capture time.
    pub camera_transform: Matrix4<f64>,
    /// Camera intrinsics for the frame.
    pub intrinsics: CameraIntrinsics,
    /// Depth at the contour centroid in meters, when the sensor had one.
    #[serde(default)]
    pub depth_sample: Option<f64>,
}

impl FrameObservation {
    /// Distance to the object used for the observed size.
    ///
    /// Prefers the depth sample; otherwise falls back to the camera's
    /// distance from the world origin, where the object is assumed to sit.
    pub fn object_distance(&self) -> f64 {
        match self.depth_sample {
            Some(depth) => depth,
            None => self
                .camera_transform
                .fixed_view::<3, 1>(0, 3)
                .norm(),
        }
    }

    /// Physical width implied by the pixel width at [`object_distance`](Self::object_distance).
    pub fn observed_width(&self) -> f64 {
        self.pixel_width * self.object_distance() / self.intrinsics.fx
    }
}

/// One captured frame of the reference object. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFrame {
    angle: CaptureAngle,
    observation: FrameObservation,
    scale_factor_estimate: f64,
}

impl CalibrationFrame {
    /// Record an observation and derive its scale estimate.
    pub fn new(reference: &ReferenceObject, angle: CaptureAngle, observation: FrameObservation) -> Self {
        let scale_factor_estimate = reference.width_m / observation.observed_width();
        Self {
            angle,
            observation,
            scale_factor_estimate,
        }
    }

    pub fn angle(&self) -> CaptureAngle {
        self.angle
    }

    pub fn observation(&self) -> &FrameObservation {
        &self.observation
    }

    /// Known physical size over observed size.
    pub fn scale_factor_estimate(&self) -> f64 {
        self.scale_factor_estimate
    }

    /// Finite, positive and at most [`MAX_SCALE_ESTIMATE`].
    pub fn is_valid(&self) -> bool {
        let s = self.scale_factor_estimate;
        s.is_finite() && s > 0.0 && s <= MAX_SCALE_ESTIMATE
    }

    /// `(measured_depth, measured - true depth)` for the bias fit.
    fn depth_error(&self, reference: &ReferenceObject) -> Option<(f64, f64)> {
        let measured = self.observation.depth_sample?;
        let true_depth = self.observation.intrinsics.fx * reference.width_m / self.observation.pixel_width;
        let sample = (measured, measured - true_depth);
        (sample.0.is_finite() && sample.1.is_finite()).then_some(sample)
    }
}

/// Outcome of a successful calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Average of the valid frames' scale estimates.
    pub scale_factor: f64,
    /// `[offset, slope]` of the depth error against measured depth.
    pub depth_bias: [f64; 2],
    /// `100 * (1 - variance)` of the scale estimates, in [0, 100].
    pub quality_score: f64,
    /// Frames processed.
    pub frame_count: usize,
    /// Frames whose scale estimate was accepted.
    pub valid_frame_count: usize,
    /// Completion time, unix milliseconds.
    pub timestamp_ms: u64,
    /// Catalog id of the reference object.
    pub reference_id: String,
    /// Mean squared residual of the bias fit; absent when no fit was made.
    #[serde(default)]
    pub regression_mse: Option<f64>,
}

impl CalibrationResult {
    /// The depth bias as a typed correction.
    pub fn depth_bias(&self) -> DepthBias {
        DepthBias {
            offset: self.depth_bias[0],
            slope: self.depth_bias[1],
        }
    }

    /// Younger than [`CALIBRATION_VALIDITY_MS`] at `now_ms`.
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms >= self.timestamp_ms && now_ms - self.timestamp_ms < CALIBRATION_VALIDITY_MS
    }

    /// Whether a scan captured at `captured_at_ms` may use this calibration:
    /// it must have completed strictly before the capture and still be valid
    /// at that time.
    pub fn applies_to_capture(&self, captured_at_ms: u64) -> bool {
        self.timestamp_ms < captured_at_ms && self.is_valid_at(captured_at_ms)
    }
}

/// Current time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Calibrate from captured frames, stamped with the current time.
pub fn calibrate(
    reference: &ReferenceObject,
    frames: &[CalibrationFrame],
) -> Result<CalibrationResult, CalibrationFailure> {
    calibrate_at(reference, frames, now_ms())
}

/// Calibrate from captured frames with an explicit completion time.
pub fn calibrate_at(
    reference: &ReferenceObject,
    frames: &[CalibrationFrame],
    timestamp_ms: u64,
) -> Result<CalibrationResult, CalibrationFailure> {
    if frames.len() < MIN_VALID_FRAMES {
        return Err(CalibrationFailure::InsufficientFrames {
            captured: frames.len(),
            required: MIN_VALID_FRAMES,
        });
    }

    let valid: Vec<&CalibrationFrame> = frames.iter().filter(|f| f.is_valid()).collect();
    for frame in frames.iter().filter(|f| !f.is_valid()) {
        debug!(
            angle = frame.angle.name(),
            estimate = frame.scale_factor_estimate,
            "Discarding calibration frame"
        );
    }
    if valid.len() < MIN_VALID_FRAMES {
        return Err(CalibrationFailure::InsufficientValidFrames {
            valid: valid.len(),
            captured: frames.len(),
            required: MIN_VALID_FRAMES,
        });
    }

    let estimates: Vec<f64> = valid.iter().map(|f| f.scale_factor_estimate).collect();
    let n = estimates.len() as f64;
    let scale_factor = estimates.iter().sum::<f64>() / n;
    if !scale_factor.is_finite() || scale_factor <= 0.0 {
        return Err(CalibrationFailure::InvalidScaleFactor {
            value: scale_factor,
        });
    }

    let variance = estimates
        .iter()
        .map(|s| (s - scale_factor).powi(2))
        .sum::<f64>()
        / n;
    let quality_score = (100.0 * (1.0 - variance)).clamp(0.0, 100.0);

    let samples: Vec<(f64, f64)> = valid
        .iter()
        .filter_map(|f| f.depth_error(reference))
        .collect();
    let (depth_bias, regression_mse) = if samples.len() >= 2 {
        match fit_depth_bias(&samples) {
            Some(fit) => (fit.bias.coefficients(), Some(fit.mse)),
            None => {
                let err = VolumeError::regression_failure(format!(
                    "{} depth samples do not determine a line",
                    samples.len()
                ));
                warn!(code = err.code().as_str(), error = %err, "Using zero depth bias");
                ([0.0, 0.0], None)
            }
        }
    } else {
        ([0.0, 0.0], None)
    };

    info!(
        reference = %reference.id,
        scale_factor,
        quality_score,
        valid = valid.len(),
        captured = frames.len(),
        "Calibration complete"
    );

    Ok(CalibrationResult {
        scale_factor,
        depth_bias,
        quality_score,
        frame_count: frames.len(),
        valid_frame_count: valid.len(),
        timestamp_ms,
        reference_id: reference.id.clone(),
        regression_mse,
    })
}
