//! Density and weight from a measured volume.
//!
//! Both operations are pure: first-order propagation of independent
//! uncertainties through a ratio (density) or a product (weight).
//!
//! # Example
//!
//! ```
//! use scan_volume::density::{estimate_density, QualityTier};
//!
//! let estimate = estimate_density(0.150, 0.005, 0.000_120, 0.000_005)
//!     .estimate()
//!     .cloned()
//!     .unwrap();
//! assert!((estimate.density - 1250.0).abs() < 1e-9);
//! assert_eq!(estimate.tier, QualityTier::Fair);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lower bound of plausible densities, g/mL.
pub const MIN_PLAUSIBLE_G_PER_ML: f64 = 0.05;

/// Upper bound of plausible densities, g/mL.
pub const MAX_PLAUSIBLE_G_PER_ML: f64 = 3.0;

/// kg/m³ per g/mL.
const KG_M3_PER_G_ML: f64 = 1000.0;

/// Coarse grade of a relative uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    /// Tier for a relative uncertainty (0.05 = 5%).
    pub fn from_relative_uncertainty(relative: f64) -> Self {
        match relative {
            r if r < 0.02 => QualityTier::Excellent,
            r if r < 0.05 => QualityTier::Good,
            r if r < 0.10 => QualityTier::Fair,
            _ => QualityTier::Poor,
        }
    }

    /// Lowercase name, as serialized.
    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Fair => "fair",
            QualityTier::Poor => "poor",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Density with its propagated uncertainty. SI units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityEstimate {
    /// kg
    pub mass: f64,
    /// One standard deviation, kg.
    pub mass_uncertainty: f64,
    /// m³
    pub volume: f64,
    /// One standard deviation, m³.
    pub volume_uncertainty: f64,
    /// kg/m³
    pub density: f64,
    /// One standard deviation, kg/m³.
    pub uncertainty: f64,
    /// Classification of `uncertainty / density`.
    pub tier: QualityTier,
}

impl DensityEstimate {
    /// `uncertainty / density`.
    pub fn relative_uncertainty(&self) -> f64 {
        self.uncertainty / self.density
    }

    /// Density in g/mL.
    pub fn density_g_per_ml(&self) -> f64 {
        self.density / KG_M3_PER_G_ML
    }

    /// Within [`MIN_PLAUSIBLE_G_PER_ML`, `MAX_PLAUSIBLE_G_PER_ML`]. Outside
    /// that range the mass or volume is most likely wrong.
    pub fn is_plausible(&self) -> bool {
        (MIN_PLAUSIBLE_G_PER_ML..=MAX_PLAUSIBLE_G_PER_ML).contains(&self.density_g_per_ml())
    }
}

/// Outcome of [`estimate_density`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DensityResult {
    /// Inputs were valid.
    Estimated(DensityEstimate),
    /// The inputs do not define a density.
    Undefined { reason: String },
}

impl DensityResult {
    /// The estimate, if one was made.
    pub fn estimate(&self) -> Option<&DensityEstimate> {
        match self {
            DensityResult::Estimated(e) => Some(e),
            DensityResult::Undefined { .. } => None,
        }
    }

    /// True for [`DensityResult::Estimated`].
    pub fn is_defined(&self) -> bool {
        self.estimate().is_some()
    }
}

fn check_inputs(pairs: [(&'static str, f64, f64); 2]) -> Result<(), String> {
    for (name, value, sigma) in pairs {
        if !value.is_finite() || !sigma.is_finite() {
            return Err(format!("{} or its uncertainty is not finite", name));
        }
        if value <= 0.0 {
            return Err(format!("{} must be positive, got {}", name, value));
        }
        if sigma < 0.0 {
            return Err(format!("{} uncertainty must not be negative, got {}", name, sigma));
        }
    }
    Ok(())
}

/// Density of an object from its mass (kg) and volume (m³).
pub fn estimate_density(
    mass: f64,
    mass_uncertainty: f64,
    volume: f64,
    volume_uncertainty: f64,
) -> DensityResult {
    if let Err(reason) = check_inputs([
        ("mass", mass, mass_uncertainty),
        ("volume", volume, volume_uncertainty),
    ]) {
        debug!(%reason, "Density undefined");
        return DensityResult::Undefined { reason };
    }

    let density = mass / volume;
    let relative = (mass_uncertainty / mass).hypot(volume_uncertainty / volume);
    let uncertainty = density * relative;
    if !density.is_finite() || !uncertainty.is_finite() {
        return DensityResult::Undefined {
            reason: format!("density overflowed for mass {} and volume {}", mass, volume),
        };
    }

    let estimate = DensityEstimate {
        mass,
        mass_uncertainty,
        volume,
        volume_uncertainty,
        density,
        uncertainty,
        tier: QualityTier::from_relative_uncertainty(relative),
    };
    if !estimate.is_plausible() {
        warn!(
            density_g_per_ml = estimate.density_g_per_ml(),
            "Density outside the plausible range, check mass and selection"
        );
    }
    debug!(density, uncertainty, tier = %estimate.tier, "Estimated density");
    DensityResult::Estimated(estimate)
}

/// Mass with uncertainty from a volume (m³) and a known density (kg/m³).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightEstimate {
    /// kg
    pub mass: f64,
    pub uncertainty: f64,
}

/// Weight of an object of known material. `None` when the inputs are not
/// positive and finite.
pub fn estimate_weight(
    volume: f64,
    volume_uncertainty: f64,
    density: f64,
    density_uncertainty: f64,
) -> Option<WeightEstimate> {
    check_inputs([
        ("volume", volume, volume_uncertainty),
        ("density", density, density_uncertainty),
    ])
    .ok()?;
    let mass = volume * density;
    let uncertainty = mass * (volume_uncertainty / volume).hypot(density_uncertainty / density);
    (mass.is_finite() && uncertainty.is_finite()).then_some(WeightEstimate { mass, uncertainty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_density() {
        let result = estimate_density(0.150, 0.005, 0.000_120, 0.000_005);
        let e = result.estimate().unwrap();
        assert_relative_eq!(e.density, 1250.0, epsilon = 1e-9);
        let expected = ((0.005_f64 / 0.150).powi(2) + (0.000_005_f64 / 0.000_120).powi(2)).sqrt();
        assert_relative_eq!(e.relative_uncertainty(), expected, epsilon = 1e-12);
        assert_relative_eq!(e.relative_uncertainty(), 0.05336, epsilon = 1e-4);
        assert_eq!(e.tier, QualityTier::Fair);
        assert!(e.is_plausible());
    }

    #[test]
    fn test_tiers() {
        assert_eq!(QualityTier::from_relative_uncertainty(0.0), QualityTier::Excellent);
        assert_eq!(QualityTier::from_relative_uncertainty(0.019), QualityTier::Excellent);
        assert_eq!(QualityTier::from_relative_uncertainty(0.02), QualityTier::Good);
        assert_eq!(QualityTier::from_relative_uncertainty(0.05), QualityTier::Fair);
        assert_eq!(QualityTier::from_relative_uncertainty(0.10), QualityTier::Poor);
        assert_eq!(QualityTier::from_relative_uncertainty(f64::NAN), QualityTier::Poor);
    }

    #[test]
    fn test_undefined_inputs() {
        for (m, sm, v, sv) in [
            (0.0, 0.0, 1.0, 0.0),
            (1.0, 0.0, 0.0, 0.0),
            (-1.0, 0.0, 1.0, 0.0),
            (1.0, f64::NAN, 1.0, 0.0),
            (1.0, 0.0, f64::INFINITY, 0.0),
            (1.0, -0.1, 1.0, 0.0),
        ] {
            let result = estimate_density(m, sm, v, sv);
            assert!(
                matches!(result, DensityResult::Undefined { .. }),
                "expected undefined for {:?}",
                (m, sm, v, sv)
            );
        }
    }

    #[test]
    fn test_implausible_density_is_still_reported() {
        // 10 g/mL
        let e = estimate_density(10.0, 0.0, 0.001, 0.0);
        let e = e.estimate().unwrap();
        assert!(!e.is_plausible());
        assert_eq!(e.tier, QualityTier::Excellent);
    }

    #[test]
    fn test_weight() {
        let w = estimate_weight(0.000_120, 0.000_005, 1250.0, 25.0).unwrap();
        assert_relative_eq!(w.mass, 0.15, epsilon = 1e-12);
        let expected = 0.15 * ((0.000_005_f64 / 0.000_120).powi(2) + (0.02_f64).powi(2)).sqrt();
        assert_relative_eq!(w.uncertainty, expected, epsilon = 1e-12);
        assert!(estimate_weight(0.0, 0.0, 1.0, 0.0).is_none());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(estimate_density(1.0, 0.0, 0.001, 0.0)).unwrap();
        assert_eq!(json["status"], "estimated");
        assert_eq!(json["tier"], "excellent");
    }
}
