//! Fade curve implementations for crossfades and background fades
//!
//! Curves map normalized fade progress (0.0 to 1.0) to a gain multiplier.
//! Crossfades default to linear ramps; the other shapes are selectable
//! through configuration.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Fade curve types
///
/// - Linear: Constant rate of change
/// - Exponential: Slow start, fast finish
/// - Logarithmic: Fast start, slow finish
/// - SCurve: Smooth acceleration and deceleration
/// - EqualPower: Constant perceived loudness during crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// v(t) = t²
    Exponential,

    /// v(t) = √t (fade-in), (1-t)² (fade-out)
    Logarithmic,

    /// v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Fade-in multiplier at normalized `position` (0.0 silent, 1.0 full)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-out multiplier at normalized `position` (1.0 at start, 0.0 at end)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::Exponential => "Exponential",
            FadeCurve::Logarithmic => "Logarithmic",
            FadeCurve::SCurve => "S-Curve",
            FadeCurve::EqualPower => "Equal Power",
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FadeCurve; 5] = [
        FadeCurve::Linear,
        FadeCurve::Exponential,
        FadeCurve::Logarithmic,
        FadeCurve::SCurve,
        FadeCurve::EqualPower,
    ];

    #[test]
    fn test_fade_in_bounds() {
        for curve in ALL {
            assert!(curve.calculate_fade_in(0.0).abs() < 0.01, "{:?}", curve);
            assert!((curve.calculate_fade_in(1.0) - 1.0).abs() < 0.01, "{:?}", curve);
        }
    }

    #[test]
    fn test_fade_out_bounds() {
        for curve in ALL {
            assert!((curve.calculate_fade_out(0.0) - 1.0).abs() < 0.01, "{:?}", curve);
            assert!(curve.calculate_fade_out(1.0).abs() < 0.01, "{:?}", curve);
        }
    }

    #[test]
    fn test_linear_is_complementary() {
        let curve = FadeCurve::Linear;
        for step in 0..=10 {
            let t = step as f32 / 10.0;
            let sum = curve.calculate_fade_in(t) + curve.calculate_fade_out(t);
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_position_is_clamped() {
        assert_eq!(FadeCurve::Linear.calculate_fade_in(-3.0), 0.0);
        assert_eq!(FadeCurve::Linear.calculate_fade_in(7.0), 1.0);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(FadeCurve::SCurve.to_string(), "S-Curve");
        assert_eq!(FadeCurve::EqualPower.to_string(), "Equal Power");
    }

    #[test]
    fn test_default_is_linear() {
        assert_eq!(FadeCurve::default(), FadeCurve::Linear);
    }
}
