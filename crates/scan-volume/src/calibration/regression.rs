//! Depth bias regression.
//!
//! Fits `error = offset + slope * measured_depth` by ordinary least squares,
//! where `error = measured_depth - true_depth`.

use serde::{Deserialize, Serialize};

/// Linear depth bias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthBias {
    /// Constant term in meters.
    pub offset: f64,
    /// Error per meter of measured depth.
    pub slope: f64,
}

impl DepthBias {
    /// Coefficients as `[offset, slope]`.
    pub fn coefficients(&self) -> [f64; 2] {
        [self.offset, self.slope]
    }

    /// Predicted error at `depth`.
    pub fn error_at(&self, depth: f64) -> f64 {
        self.offset + self.slope * depth
    }

    /// Remove the predicted error from a measured depth.
    pub fn correct(&self, depth: f64) -> f64 {
        depth - self.error_at(depth)
    }
}

/// A fitted bias with its residual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasFit {
    /// The coefficients.
    pub bias: DepthBias,
    /// Mean squared residual.
    pub mse: f64,
}

/// Closed-form least squares over `(depth, error)` samples.
///
/// Returns `None` with fewer than two samples, non-finite input, or when all
/// depths coincide (singular normal equations).
pub fn fit_depth_bias(samples: &[(f64, f64)]) -> Option<BiasFit> {
    if samples.len() < 2
        || samples
            .iter()
            .any(|(x, y)| !x.is_finite() || !y.is_finite())
    {
        return None;
    }

    let n = samples.len() as f64;
    let (sx, sy, sxx, sxy) = samples.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxx, sxy), &(x, y)| (sx + x, sy + y, sxx + x * x, sxy + x * y),
    );

    let denom = n * sxx - sx * sx;
    if !denom.is_finite() || denom.abs() <= 1e-12 * (n * sxx).abs().max(f64::MIN_POSITIVE) {
        return None;
    }

    let slope = (n * sxy - sx * sy) / denom;
    let offset = (sy - slope * sx) / n;
    let bias = DepthBias { offset, slope };
    let mse = samples
        .iter()
        .map(|&(x, y)| (y - bias.error_at(x)).powi(2))
        .sum::<f64>()
        / n;

    (offset.is_finite() && slope.is_finite()).then_some(BiasFit { bias, mse })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_line() {
        let samples: Vec<_> = [0.3, 0.5, 0.8, 1.2]
            .iter()
            .map(|&d| (d, 0.004 + 0.01 * d))
            .collect();
        let fit = fit_depth_bias(&samples).unwrap();
        assert_relative_eq!(fit.bias.offset, 0.004, epsilon = 1e-12);
        assert_relative_eq!(fit.bias.slope, 0.01, epsilon = 1e-12);
        assert!(fit.mse < 1e-20);
        assert_relative_eq!(fit.bias.correct(1.0), 1.0 - 0.014, epsilon = 1e-12);
    }

    #[test]
    fn test_noisy_line_has_residual() {
        let samples = [(0.4, 0.01), (0.6, 0.0), (0.8, 0.012), (1.0, 0.004)];
        let fit = fit_depth_bias(&samples).unwrap();
        assert!(fit.mse > 0.0);
    }

    #[test]
    fn test_singular_inputs() {
        assert!(fit_depth_bias(&[]).is_none());
        assert!(fit_depth_bias(&[(0.5, 0.01)]).is_none());
        assert!(fit_depth_bias(&[(0.5, 0.01), (0.5, 0.02)]).is_none());
        assert!(fit_depth_bias(&[(0.5, f64::NAN), (0.7, 0.02)]).is_none());
    }
}
