//! Falloff curves.
//!
//! A curve maps distance from the brush center to influence. Curves are
//! evaluated on `p = 1 - d / r`, so every preset is 1 at the center and 0 at
//! the radius.

use serde::{Deserialize, Serialize};

/// Falloff curve preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FalloffCurve {
    /// Linear falloff: p
    Linear = 0,
    /// Hermite smoothstep: 3p² - 2p³
    #[default]
    Smooth = 1,
    /// Quintic smootherstep: 6p⁵ - 15p⁴ + 10p³
    Smoother = 2,
    /// Quadratic decay: p²
    Sharp = 3,
    /// Square root: √p
    Root = 4,
    /// Full strength within the radius
    Constant = 5,
    /// Spherical: √(1 - d²)
    Sphere = 6,
    /// Fourth power: p⁴
    Pow4 = 7,
    /// Inverse square: p(2 - p)
    InvSquare = 8,
}

impl FalloffCurve {
    /// Evaluate at a normalized distance (0.0 = center, 1.0 = edge).
    pub fn evaluate(&self, normalized_distance: f32) -> f32 {
        let d = normalized_distance.clamp(0.0, 1.0);
        let p = 1.0 - d;
        match self {
            FalloffCurve::Linear => p,
            FalloffCurve::Smooth => p * p * (3.0 - 2.0 * p),
            FalloffCurve::Smoother => p * p * p * (p * (p * 6.0 - 15.0) + 10.0),
            FalloffCurve::Sharp => p * p,
            FalloffCurve::Root => p.sqrt(),
            FalloffCurve::Constant => 1.0,
            FalloffCurve::Sphere => (1.0 - d * d).max(0.0).sqrt(),
            FalloffCurve::Pow4 => p * p * p * p,
            FalloffCurve::InvSquare => p * (2.0 - p),
        }
    }
}

/// Strength at distance `distance` from the center of a brush of `radius`.
///
/// Zero beyond the radius and for a zero radius.
pub fn curve_strength(distance: f32, radius: f32, curve: FalloffCurve) -> f32 {
    if radius <= 0.0 || distance > radius {
        return 0.0;
    }
    curve.evaluate(distance / radius)
}
