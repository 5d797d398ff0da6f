//! Error types for scan reconstruction and measurement with rich diagnostics.
//!
//! This module provides:
//! - Machine-readable error codes for programmatic handling
//! - Specific reasons for every failure (which stage, which parameter)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `VOL-XXXX`:
//! - `VOL-1xxx`: Input and parameter errors
//! - `VOL-2xxx`: Data sufficiency and geometry errors
//! - `VOL-3xxx`: Calibration errors
//! - `VOL-4xxx`: Run control (cancellation)
//! - `VOL-5xxx`: Persistence and configuration errors
//! - `VOL-6xxx`: Topology warnings (collected, never raised)
//!
//! # Example
//!
//! ```
//! use scan_volume::{ErrorCode, VolumeError};
//!
//! let err = VolumeError::invalid_grid("dim_x = 32 is outside [64, 256]");
//! assert_eq!(err.code(), ErrorCode::InvalidGridParameters);
//! assert_eq!(err.code().as_str(), "VOL-1001");
//! ```

use miette::Diagnostic;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scan operations.
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Input errors (1xxx)
    /// VOL-1001: Voxel grid parameters out of range or non-finite
    InvalidGridParameters = 1001,
    /// VOL-1002: Malformed input (misaligned attribute sequences)
    InvalidInput = 1002,
    /// VOL-1003: NaN or Infinity detected at a stage boundary
    NonFiniteValue = 1003,

    // Data errors (2xxx)
    /// VOL-2001: Not enough data to run the stage
    InsufficientData = 2001,
    /// VOL-2002: Geometry too degenerate to yield a measurement
    DegenerateGeometry = 2002,

    // Calibration errors (3xxx)
    /// VOL-3001: Depth bias regression was singular
    RegressionFailure = 3001,
    /// VOL-3002: Too few frames passed the validity filter
    InsufficientValidFrames = 3002,
    /// VOL-3003: No reference object was selected
    NoReferenceObject = 3003,
    /// VOL-3004: Final scale factor is non-finite or non-positive
    InvalidScaleFactor = 3004,
    /// VOL-3005: Frame captured while the session was not capturing
    CaptureOutOfOrder = 3005,
    /// VOL-3006: Reference object id not found in the catalog
    UnknownReferenceObject = 3006,

    // Run control (4xxx)
    /// VOL-4001: Run was cancelled
    Cancelled = 4001,

    // Persistence (5xxx)
    /// VOL-5001: Failed to read persisted state
    PersistenceRead = 5001,
    /// VOL-5002: Failed to write persisted state
    PersistenceWrite = 5002,
    /// VOL-5003: Persisted state is malformed
    PersistenceFormat = 5003,
    /// VOL-5004: Configuration could not be parsed
    ConfigParse = 5004,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `VOL-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidGridParameters => "VOL-1001",
            ErrorCode::InvalidInput => "VOL-1002",
            ErrorCode::NonFiniteValue => "VOL-1003",
            ErrorCode::InsufficientData => "VOL-2001",
            ErrorCode::DegenerateGeometry => "VOL-2002",
            ErrorCode::RegressionFailure => "VOL-3001",
            ErrorCode::InsufficientValidFrames => "VOL-3002",
            ErrorCode::NoReferenceObject => "VOL-3003",
            ErrorCode::InvalidScaleFactor => "VOL-3004",
            ErrorCode::CaptureOutOfOrder => "VOL-3005",
            ErrorCode::UnknownReferenceObject => "VOL-3006",
            ErrorCode::Cancelled => "VOL-4001",
            ErrorCode::PersistenceRead => "VOL-5001",
            ErrorCode::PersistenceWrite => "VOL-5002",
            ErrorCode::PersistenceFormat => "VOL-5003",
            ErrorCode::ConfigParse => "VOL-5004",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for scan errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Capture the object again.
    RecaptureScan { hint: String },
    /// Run the calibration flow again.
    Recalibrate { hint: String },
    /// Check the input data.
    CheckInput { checks: Vec<String> },
    /// Retry the run; nothing is wrong with the data.
    Retry,
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::RecaptureScan { hint } => {
                write!(f, "Capture the object again: {}", hint)
            }
            RecoverySuggestion::Recalibrate { hint } => {
                write!(f, "Run calibration again: {}", hint)
            }
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::Retry => write!(f, "Retry the operation"),
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Reasons a calibration run fails.
///
/// Each reason is distinct; a failed run never falls back to a default
/// scale factor.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum CalibrationFailure {
    /// Processing was requested before a reference object was chosen.
    #[error("no reference object selected")]
    #[diagnostic(
        code(scan::calibration::no_object),
        help("Select a reference object with known dimensions before capturing frames.")
    )]
    NoObjectSelected,

    /// Fewer frames were captured than processing needs.
    #[error("insufficient calibration frames: captured {captured}, need at least {required}")]
    #[diagnostic(
        code(scan::calibration::frames),
        help("Capture the reference object from every required angle.")
    )]
    InsufficientFrames { captured: usize, required: usize },

    /// Frames were captured but too few produced a usable scale factor.
    #[error(
        "insufficient valid calibration frames: {valid} of {captured} passed, need at least {required}"
    )]
    #[diagnostic(
        code(scan::calibration::valid_frames),
        help(
            "Scale estimates must be finite, positive and at most 1.0. Make sure the whole reference object is in view."
        )
    )]
    InsufficientValidFrames {
        valid: usize,
        captured: usize,
        required: usize,
    },

    /// The averaged scale factor is unusable.
    #[error("invalid final scale factor: {value}")]
    #[diagnostic(
        code(scan::calibration::scale_factor),
        help("Recapture the reference object; the detected contours are inconsistent.")
    )]
    InvalidScaleFactor { value: f64 },

    /// A frame arrived while the session was not capturing.
    #[error("cannot capture a frame while the session is {state}")]
    #[diagnostic(code(scan::calibration::out_of_order))]
    CaptureOutOfOrder { state: &'static str },

    /// The catalog has no entry for the requested reference object.
    #[error("unknown reference object '{id}'")]
    #[diagnostic(
        code(scan::calibration::unknown_object),
        help("Use one of the catalog identifiers, e.g. 'credit_card'.")
    )]
    UnknownReferenceObject { id: String },
}

impl CalibrationFailure {
    /// Returns the machine-readable error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CalibrationFailure::NoObjectSelected => ErrorCode::NoReferenceObject,
            CalibrationFailure::InsufficientFrames { .. } => ErrorCode::InsufficientData,
            CalibrationFailure::InsufficientValidFrames { .. } => {
                ErrorCode::InsufficientValidFrames
            }
            CalibrationFailure::InvalidScaleFactor { .. } => ErrorCode::InvalidScaleFactor,
            CalibrationFailure::CaptureOutOfOrder { .. } => ErrorCode::CaptureOutOfOrder,
            CalibrationFailure::UnknownReferenceObject { .. } => {
                ErrorCode::UnknownReferenceObject
            }
        }
    }
}

/// Errors that can occur while reconstructing or measuring a scan.
///
/// Each variant carries a specific reason string; none of them stands in
/// for a measurement.
#[derive(Debug, Error, Diagnostic)]
pub enum VolumeError {
    /// Voxel grid parameters out of range.
    #[error("invalid grid parameters: {details}")]
    #[diagnostic(
        code(scan::grid::invalid),
        help("Grid dimensions must lie in [64, 256]; voxel size and truncation must be finite and positive.")
    )]
    InvalidGridParameters { details: String },

    /// Malformed input.
    #[error("invalid input: {details}")]
    #[diagnostic(code(scan::input::invalid))]
    InvalidInput { details: String },

    /// NaN or Infinity crossed a stage boundary.
    #[error("non-finite value after {stage}: {details}")]
    #[diagnostic(
        code(scan::numeric::non_finite),
        help("The input contains NaN/Infinity or the geometry is numerically degenerate.")
    )]
    NonFiniteValue { stage: &'static str, details: String },

    /// Not enough data to proceed.
    #[error("insufficient data: {details}")]
    #[diagnostic(
        code(scan::data::insufficient),
        help("Capture more of the object, or relax the confidence filter.")
    )]
    InsufficientData { details: String },

    /// Geometry too degenerate for a trustworthy measurement.
    #[error("degenerate geometry: {details}")]
    #[diagnostic(code(scan::geometry::degenerate))]
    DegenerateGeometry { details: String },

    /// Depth bias regression failed (singular normal equations).
    #[error("depth bias regression failed: {details}")]
    #[diagnostic(
        code(scan::calibration::regression),
        help("Capture frames at a wider range of distances.")
    )]
    RegressionFailure { details: String },

    /// Calibration run failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Calibration(#[from] CalibrationFailure),

    /// The run was cancelled.
    #[error("cancelled during {stage}")]
    #[diagnostic(code(scan::run::cancelled))]
    Cancelled { stage: &'static str },

    /// Error reading persisted state.
    #[error("failed to read {path}")]
    #[diagnostic(code(scan::persistence::read))]
    PersistenceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing persisted state.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(scan::persistence::write),
        help("Check that the directory exists and is writable")
    )]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state could not be decoded or encoded.
    #[error("malformed persisted state in {path}: {details}")]
    #[diagnostic(
        code(scan::persistence::format),
        help("Reset the calibration to discard the stored state.")
    )]
    PersistenceFormat { path: PathBuf, details: String },

    /// Configuration could not be parsed or serialized.
    #[error("configuration error: {details}")]
    #[diagnostic(code(scan::config::parse))]
    ConfigParse { details: String },
}

impl VolumeError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            VolumeError::InvalidGridParameters { .. } => ErrorCode::InvalidGridParameters,
            VolumeError::InvalidInput { .. } => ErrorCode::InvalidInput,
            VolumeError::NonFiniteValue { .. } => ErrorCode::NonFiniteValue,
            VolumeError::InsufficientData { .. } => ErrorCode::InsufficientData,
            VolumeError::DegenerateGeometry { .. } => ErrorCode::DegenerateGeometry,
            VolumeError::RegressionFailure { .. } => ErrorCode::RegressionFailure,
            VolumeError::Calibration(reason) => reason.error_code(),
            VolumeError::Cancelled { .. } => ErrorCode::Cancelled,
            VolumeError::PersistenceRead { .. } => ErrorCode::PersistenceRead,
            VolumeError::PersistenceWrite { .. } => ErrorCode::PersistenceWrite,
            VolumeError::PersistenceFormat { .. } => ErrorCode::PersistenceFormat,
            VolumeError::ConfigParse { .. } => ErrorCode::ConfigParse,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            VolumeError::InvalidGridParameters { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("grid.voxel_size".into(), "a positive value in meters".into()),
                    ("grid.truncation_factor".into(), "a positive value".into()),
                ],
            },
            VolumeError::InvalidInput { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["aligned position/normal/confidence sequences".into()],
            },
            VolumeError::NonFiniteValue { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["NaN or infinite coordinates".into()],
            },
            VolumeError::InsufficientData { .. } => RecoverySuggestion::RecaptureScan {
                hint: "move around the object so more of its surface is observed".into(),
            },
            VolumeError::DegenerateGeometry { .. } => RecoverySuggestion::RecaptureScan {
                hint: "the captured points are flat or collinear".into(),
            },
            VolumeError::RegressionFailure { .. } => RecoverySuggestion::Recalibrate {
                hint: "vary the distance to the reference object between frames".into(),
            },
            VolumeError::Calibration(_) => RecoverySuggestion::Recalibrate {
                hint: "keep the whole reference object in view for every angle".into(),
            },
            VolumeError::Cancelled { .. } => RecoverySuggestion::Retry,
            VolumeError::PersistenceRead { .. } | VolumeError::PersistenceWrite { .. } => {
                RecoverySuggestion::CheckInput {
                    checks: vec!["file exists".into(), "file permissions".into()],
                }
            }
            VolumeError::PersistenceFormat { .. } => RecoverySuggestion::Recalibrate {
                hint: "reset the stored calibration".into(),
            },
            VolumeError::ConfigParse { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["configuration syntax".into(), "field names".into()],
            },
        }
    }

    /// Whether the error came from a user-requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, VolumeError::Cancelled { .. })
    }

    // Constructor helpers for common error patterns

    /// Create an InvalidGridParameters error.
    pub fn invalid_grid(details: impl Into<String>) -> Self {
        VolumeError::InvalidGridParameters {
            details: details.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(details: impl Into<String>) -> Self {
        VolumeError::InvalidInput {
            details: details.into(),
        }
    }

    /// Create a NonFiniteValue error.
    pub fn non_finite(stage: &'static str, details: impl Into<String>) -> Self {
        VolumeError::NonFiniteValue {
            stage,
            details: details.into(),
        }
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(details: impl Into<String>) -> Self {
        VolumeError::InsufficientData {
            details: details.into(),
        }
    }

    /// Create a DegenerateGeometry error.
    pub fn degenerate_geometry(details: impl Into<String>) -> Self {
        VolumeError::DegenerateGeometry {
            details: details.into(),
        }
    }

    /// Create a RegressionFailure error.
    pub fn regression_failure(details: impl Into<String>) -> Self {
        VolumeError::RegressionFailure {
            details: details.into(),
        }
    }

    /// Create a Cancelled error.
    pub fn cancelled(stage: &'static str) -> Self {
        VolumeError::Cancelled { stage }
    }

    /// Create a PersistenceRead error.
    pub fn persistence_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VolumeError::PersistenceRead {
            path: path.into(),
            source,
        }
    }

    /// Create a PersistenceWrite error.
    pub fn persistence_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VolumeError::PersistenceWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a PersistenceFormat error.
    pub fn persistence_format(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        VolumeError::PersistenceFormat {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a ConfigParse error.
    pub fn config(details: impl Into<String>) -> Self {
        VolumeError::ConfigParse {
            details: details.into(),
        }
    }
}

/// Topology problems found while validating a mesh.
///
/// Unlike `VolumeError`, these never abort a run. They are collected and
/// lower the mesh's quality score; an empty list means watertight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyWarning {
    /// Face references a vertex index that doesn't exist.
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },
    /// Vertex has a NaN or infinite coordinate.
    NonFiniteVertex { vertex_index: usize },
    /// Face with near-zero area.
    DegenerateFace { face_index: usize, area: f64 },
    /// Edge used by a single face.
    BoundaryEdge { vertex_a: u32, vertex_b: u32 },
    /// Edge shared by more than two faces.
    NonManifoldEdge {
        vertex_a: u32,
        vertex_b: u32,
        face_count: usize,
    },
    /// Edge whose two faces traverse it in the same direction.
    InconsistentOrientation { vertex_a: u32, vertex_b: u32 },
    /// Vertex not referenced by any face.
    IsolatedVertex { vertex_index: usize },
}

impl TopologyWarning {
    /// Returns a severity level for the warning.
    pub fn severity(&self) -> IssueSeverity {
        match self {
            TopologyWarning::InvalidVertexIndex { .. } => IssueSeverity::Error,
            TopologyWarning::NonFiniteVertex { .. } => IssueSeverity::Error,
            TopologyWarning::DegenerateFace { .. } => IssueSeverity::Warning,
            TopologyWarning::BoundaryEdge { .. } => IssueSeverity::Warning,
            TopologyWarning::NonManifoldEdge { .. } => IssueSeverity::Warning,
            TopologyWarning::InconsistentOrientation { .. } => IssueSeverity::Warning,
            TopologyWarning::IsolatedVertex { .. } => IssueSeverity::Info,
        }
    }

    /// Returns an error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            TopologyWarning::InvalidVertexIndex { .. } => "VOL-6001",
            TopologyWarning::NonFiniteVertex { .. } => "VOL-6002",
            TopologyWarning::DegenerateFace { .. } => "VOL-6003",
            TopologyWarning::BoundaryEdge { .. } => "VOL-6004",
            TopologyWarning::NonManifoldEdge { .. } => "VOL-6005",
            TopologyWarning::InconsistentOrientation { .. } => "VOL-6006",
            TopologyWarning::IsolatedVertex { .. } => "VOL-6007",
        }
    }
}

/// Severity levels for topology warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Informational, the volume is unaffected.
    Info,
    /// Warning, the volume may be off.
    Warning,
    /// Error, the mesh is invalid.
    Error,
}

impl std::fmt::Display for TopologyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyWarning::InvalidVertexIndex {
                face_index,
                vertex_index,
                vertex_count,
            } => write!(
                f,
                "face {} references vertex {}, but mesh only has {} vertices",
                face_index, vertex_index, vertex_count
            ),
            TopologyWarning::NonFiniteVertex { vertex_index } => {
                write!(f, "vertex {} has a non-finite coordinate", vertex_index)
            }
            TopologyWarning::DegenerateFace { face_index, area } => {
                write!(f, "face {} is degenerate (area: {:.2e})", face_index, area)
            }
            TopologyWarning::BoundaryEdge { vertex_a, vertex_b } => {
                write!(f, "edge ({}, {}) is an open boundary", vertex_a, vertex_b)
            }
            TopologyWarning::NonManifoldEdge {
                vertex_a,
                vertex_b,
                face_count,
            } => write!(
                f,
                "edge ({}, {}) is non-manifold (shared by {} faces)",
                vertex_a, vertex_b, face_count
            ),
            TopologyWarning::InconsistentOrientation { vertex_a, vertex_b } => write!(
                f,
                "edge ({}, {}) is traversed in the same direction by both faces",
                vertex_a, vertex_b
            ),
            TopologyWarning::IsolatedVertex { vertex_index } => {
                write!(f, "vertex {} is not used by any face", vertex_index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = VolumeError::invalid_grid("dim_x = 32");
        assert_eq!(err.code(), ErrorCode::InvalidGridParameters);
        assert_eq!(err.code().as_str(), "VOL-1001");

        let err = VolumeError::cancelled("fusion");
        assert_eq!(err.code().as_str(), "VOL-4001");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_calibration_failure_codes_are_distinct() {
        let reasons = [
            CalibrationFailure::NoObjectSelected,
            CalibrationFailure::InsufficientFrames {
                captured: 1,
                required: 2,
            },
            CalibrationFailure::InsufficientValidFrames {
                valid: 1,
                captured: 3,
                required: 2,
            },
            CalibrationFailure::InvalidScaleFactor { value: f64::NAN },
        ];
        let mut codes: Vec<_> = reasons.iter().map(|r| r.error_code().as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), reasons.len());
    }

    #[test]
    fn test_calibration_diagnostic_is_forwarded() {
        let err: VolumeError = CalibrationFailure::NoObjectSelected.into();
        let code = Diagnostic::code(&err).map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("scan::calibration::no_object"));
        assert!(Diagnostic::help(&err).is_some());
    }

    #[test]
    fn test_calibration_failure_wraps() {
        let err: VolumeError = CalibrationFailure::NoObjectSelected.into();
        assert_eq!(err.code(), ErrorCode::NoReferenceObject);
        assert_eq!(format!("{}", err), "no reference object selected");
        assert!(matches!(
            err.recovery_suggestion(),
            RecoverySuggestion::Recalibrate { .. }
        ));
    }

    #[test]
    fn test_warning_severity() {
        let warning = TopologyWarning::DegenerateFace {
            face_index: 0,
            area: 0.0,
        };
        assert_eq!(warning.severity(), IssueSeverity::Warning);

        let warning = TopologyWarning::InvalidVertexIndex {
            face_index: 0,
            vertex_index: 100,
            vertex_count: 50,
        };
        assert_eq!(warning.severity(), IssueSeverity::Error);
        assert_eq!(warning.code(), "VOL-6001");
    }

    #[test]
    fn test_error_display() {
        let err = VolumeError::non_finite("conditioning", "3 points with NaN coordinates");
        let display = format!("{}", err);
        assert!(display.contains("conditioning"));
        assert!(display.contains("3 points"));
    }
}
