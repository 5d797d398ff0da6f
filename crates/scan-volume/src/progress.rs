//! Progress reporting and cooperative cancellation for pipeline runs.
//!
//! This module provides:
//! - Progress callbacks during expensive stages (fusion, extraction, decimation)
//! - A [`RunHandle`] that reports which stage a run is in and lets another
//!   thread cancel it
//!
//! Cancellation is cooperative. Stages poll the handle between units of work
//! and abandon their output when it fires, so a cancelled run never yields a
//! partial mesh or measurement.
//!
//! # Example
//!
//! ```
//! use scan_volume::progress::{PipelineStage, RunHandle};
//!
//! let handle = RunHandle::with_callback(Box::new(|progress| {
//!     println!("{}%: {}", progress.percent(), progress.message);
//!     true // return false to cancel
//! }));
//! assert_eq!(handle.stage(), PipelineStage::Pending);
//! handle.cancel();
//! assert!(handle.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{VolumeError, VolumeResult};

/// Progress information passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current step (0-based).
    pub current: u64,

    /// Total number of steps.
    pub total: u64,

    /// Human-readable message describing current operation.
    pub message: String,

    /// Elapsed time since operation started.
    pub elapsed: Duration,

    /// Estimated time remaining (if available).
    pub estimated_remaining: Option<Duration>,
}

impl Progress {
    /// Create a new progress report.
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64) / (self.total as f64)
        }
    }

    /// Get progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }

    /// Check if the operation is complete.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Callback function for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// A thread-safe progress tracker for one stage.
#[derive(Debug)]
pub struct ProgressTracker {
    current: AtomicU64,
    total: u64,
    cancelled: AtomicBool,
    start_time: Instant,
    last_callback_time: Mutex<Instant>,
    callback_interval: Duration,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new(total: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            total,
            cancelled: AtomicBool::new(false),
            start_time: Instant::now(),
            last_callback_time: Mutex::new(Instant::now()),
            callback_interval: Duration::from_millis(100),
        }
    }

    /// Create a tracker with custom callback interval.
    pub fn with_interval(total: u64, interval: Duration) -> Self {
        let mut tracker = Self::new(total);
        tracker.callback_interval = interval;
        tracker
    }

    /// Increment progress by one.
    #[inline]
    pub fn increment(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the current progress value.
    #[inline]
    pub fn set(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
    }

    /// Get the current progress value.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Check if cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Get elapsed time.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Estimate remaining time based on current progress.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let current = self.current();
        if current == 0 {
            return None;
        }

        let rate = current as f64 / self.elapsed().as_secs_f64();
        if rate > 0.0 && rate.is_finite() {
            let remaining = self.total.saturating_sub(current) as f64 / rate;
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        }
    }

    /// Create a Progress snapshot.
    pub fn snapshot(&self, message: impl Into<String>) -> Progress {
        Progress {
            current: self.current(),
            total: self.total,
            message: message.into(),
            elapsed: self.elapsed(),
            estimated_remaining: self.estimated_remaining(),
        }
    }

    /// Call the callback if enough time has passed since last call.
    ///
    /// Returns `false` if the callback requested cancellation.
    pub fn maybe_callback(
        &self,
        callback: Option<&ProgressCallback>,
        message: impl Into<String>,
    ) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let Some(callback) = callback else {
            return true;
        };

        let now = Instant::now();
        {
            let mut last = self
                .last_callback_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if now.duration_since(*last) < self.callback_interval {
                return true;
            }
            *last = now;
        }

        let should_continue = callback(&self.snapshot(message));
        if !should_continue {
            self.cancel();
        }
        should_continue
    }
}

/// Stages of one pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PipelineStage {
    /// Not started yet.
    Pending = 0,
    /// Confidence filtering, downsampling and denoising.
    Conditioning = 1,
    /// TSDF integration.
    Fusion = 2,
    /// Marching cubes.
    Extraction = 3,
    /// Quadric decimation.
    Simplification = 4,
    /// Volume, area, topology and quality.
    Measurement = 5,
    /// Calibration correction.
    Calibration = 6,
    /// Result delivered.
    Finished = 7,
    /// Run aborted with an error.
    Failed = 8,
    /// Run cancelled.
    Cancelled = 9,
}

impl PipelineStage {
    /// Number of working stages (conditioning through calibration).
    pub const WORKING_STAGES: u64 = 6;

    /// Stable lowercase name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Pending => "pending",
            PipelineStage::Conditioning => "conditioning",
            PipelineStage::Fusion => "fusion",
            PipelineStage::Extraction => "extraction",
            PipelineStage::Simplification => "simplification",
            PipelineStage::Measurement => "measurement",
            PipelineStage::Calibration => "calibration",
            PipelineStage::Finished => "finished",
            PipelineStage::Failed => "failed",
            PipelineStage::Cancelled => "cancelled",
        }
    }

    /// True once the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Finished | PipelineStage::Failed | PipelineStage::Cancelled
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineStage::Conditioning,
            2 => PipelineStage::Fusion,
            3 => PipelineStage::Extraction,
            4 => PipelineStage::Simplification,
            5 => PipelineStage::Measurement,
            6 => PipelineStage::Calibration,
            7 => PipelineStage::Finished,
            8 => PipelineStage::Failed,
            9 => PipelineStage::Cancelled,
            _ => PipelineStage::Pending,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

struct RunState {
    cancelled: AtomicBool,
    stage: AtomicU8,
    callback: Option<ProgressCallback>,
}

/// Status and cancellation handle shared between a run and its observers.
///
/// Cloning is cheap; all clones observe the same run.
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<RunState>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("stage", &self.stage())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunHandle {
    /// Handle without a progress callback.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Handle that forwards every progress report to `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self::build(Some(callback))
    }

    fn build(callback: Option<ProgressCallback>) -> Self {
        Self {
            inner: Arc::new(RunState {
                cancelled: AtomicBool::new(false),
                stage: AtomicU8::new(PipelineStage::Pending as u8),
                callback,
            }),
        }
    }

    /// Request cancellation. The run stops at its next checkpoint.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// The stage the run is currently in.
    pub fn stage(&self) -> PipelineStage {
        PipelineStage::from_u8(self.inner.stage.load(Ordering::SeqCst))
    }

    pub(crate) fn set_stage(&self, stage: PipelineStage) {
        self.inner.stage.store(stage as u8, Ordering::SeqCst);
    }

    /// Move to `stage` after checking for cancellation.
    pub(crate) fn enter(&self, stage: PipelineStage) -> VolumeResult<()> {
        self.checkpoint(stage)?;
        self.set_stage(stage);
        let progress = Progress::new(
            (stage as u64).saturating_sub(1),
            PipelineStage::WORKING_STAGES,
            stage.name(),
        );
        if !self.report(&progress) {
            return Err(VolumeError::cancelled(stage.name()));
        }
        Ok(())
    }

    /// Fail with `Cancelled` if cancellation was requested.
    pub(crate) fn checkpoint(&self, stage: PipelineStage) -> VolumeResult<()> {
        if self.is_cancelled() {
            Err(VolumeError::cancelled(stage.name()))
        } else {
            Ok(())
        }
    }

    /// Forward a report to the callback. Returns `false` once cancelled.
    pub fn report(&self, progress: &Progress) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if let Some(callback) = &self.inner.callback {
            if !callback(progress) {
                self.cancel();
                return false;
            }
        }
        true
    }

    /// A [`ProgressCallback`] that feeds stage-internal progress into this handle.
    pub fn as_callback(&self) -> ProgressCallback {
        let handle = self.clone();
        Box::new(move |progress| handle.report(progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_progress_fraction() {
        let p = Progress::new(50, 100, "test");
        assert!((p.fraction() - 0.5).abs() < 1e-10);
        assert_eq!(p.percent(), 50);
        assert!(!p.is_complete());
        assert_eq!(Progress::new(0, 0, "empty").fraction(), 0.0);
    }

    #[test]
    fn test_tracker_cancellation_via_callback() {
        let tracker = ProgressTracker::with_interval(10, Duration::ZERO);
        let stop: ProgressCallback = Box::new(|_| false);
        tracker.increment();
        assert!(!tracker.maybe_callback(Some(&stop), "step"));
        assert!(tracker.is_cancelled());
        assert!(!tracker.maybe_callback(None, "step"));
    }

    #[test]
    fn test_tracker_without_callback_continues() {
        let tracker = ProgressTracker::new(3);
        tracker.set(2);
        assert!(tracker.maybe_callback(None, "step"));
        assert_eq!(tracker.snapshot("x").current, 2);
    }

    #[test]
    fn test_run_handle_stage_and_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handle = RunHandle::with_callback(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            true
        }));

        handle.enter(PipelineStage::Conditioning).unwrap();
        assert_eq!(handle.stage(), PipelineStage::Conditioning);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let observer = handle.clone();
        observer.cancel();
        let err = handle.enter(PipelineStage::Fusion).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(handle.stage(), PipelineStage::Conditioning);
    }

    #[test]
    fn test_callback_returning_false_cancels() {
        let handle = RunHandle::with_callback(Box::new(|_| false));
        assert!(handle.enter(PipelineStage::Conditioning).is_err());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_as_callback_forwards() {
        let handle = RunHandle::new();
        let callback = handle.as_callback();
        assert!(callback(&Progress::new(1, 2, "x")));
        handle.cancel();
        assert!(!callback(&Progress::new(1, 2, "x")));
    }
}
