//! Fixed-point math utilities for deterministic simulation.
//!
//! Every quantity that feeds the battle loop (positions, speeds, ranges,
//! the step accumulator) is 32.32 fixed-point. Two machines replaying the
//! same deploy log must land on the same bits, which floats cannot promise.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Fixed-point 2D vector in scene (pixel) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from whole pixel coordinates.
    #[must_use]
    pub fn from_int(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x.saturating_sub(other.x);
        let dy = self.y.saturating_sub(other.y);
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }

    /// Euclidean distance between two points.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Length of the vector.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x
            .saturating_mul(other.x)
            .saturating_add(self.y.saturating_mul(other.y))
    }

    /// Linearly interpolate between two vectors, saturating at the range ends.
    #[must_use]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        let along = |a: Fixed, b: Fixed| a.saturating_add(b.saturating_sub(a).saturating_mul(t));
        Self {
            x: along(self.x, other.x),
            y: along(self.y, other.y),
        }
    }

    /// Step towards `target` by at most `max_step`.
    ///
    /// Returns the new position and whether the target was reached.
    #[must_use]
    pub fn move_towards(self, target: Self, max_step: Fixed) -> (Self, bool) {
        let delta = target - self;
        let dist = delta.length();
        if dist <= max_step || dist == Fixed::ZERO {
            return (target, true);
        }
        let t = max_step / dist;
        (self.lerp(target, t), false)
    }
}

/// Computes the square root of a fixed-point number using binary search.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::ONE { value } else { Fixed::ONE };

    // 64 halvings cover the whole 32.32 range down to the last bit.
    for _ in 0..64 {
        let mid = low + (high - low) / Fixed::from_num(2);
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

/// Convert a duration in milliseconds to whole fixed steps at `steps_per_second`.
///
/// Rounds to the nearest step; a non-zero duration is at least one step.
#[must_use]
pub const fn millis_to_steps(millis: u32, steps_per_second: u32) -> u32 {
    if millis == 0 {
        return 0;
    }
    let steps = (millis as u64 * steps_per_second as u64 + 500) / 1000;
    if steps == 0 {
        1
    } else {
        steps as u32
    }
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x.saturating_add(rhs.x),
            y: self.y.saturating_add(rhs.y),
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x.saturating_sub(rhs.x),
            y: self.y.saturating_sub(rhs.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_distance() {
        let a = Vec2Fixed::from_int(3, 0);
        let b = Vec2Fixed::from_int(0, 4);
        assert_eq!(a.distance_squared(b), Fixed::from_num(25));

        let d = a.distance(b);
        let epsilon = Fixed::ONE / Fixed::from_num(10000);
        assert!((d - Fixed::from_num(5)).abs() < epsilon, "got {d:?}");
    }

    #[test]
    fn test_fixed_sqrt_exact_squares() {
        for n in [0, 1, 4, 9, 144, 10_000, 4_000_000] {
            let root = fixed_sqrt(Fixed::from_num(n));
            let expected = Fixed::from_num(f64::from(n).sqrt());
            let epsilon = Fixed::ONE / Fixed::from_num(10000);
            assert!((root - expected).abs() < epsilon, "sqrt({n}) = {root:?}");
        }
    }

    #[test]
    fn test_move_towards_reaches_and_stops() {
        let start = Vec2Fixed::ZERO;
        let target = Vec2Fixed::from_int(10, 0);

        let (pos, arrived) = start.move_towards(target, Fixed::from_num(4));
        assert!(!arrived);
        assert_eq!(pos, Vec2Fixed::from_int(4, 0));

        let (pos, arrived) = pos.move_towards(target, Fixed::from_num(8));
        assert!(arrived);
        assert_eq!(pos, target);
    }

    #[test]
    fn test_extreme_positions_saturate() {
        let far = Vec2Fixed::new(Fixed::MIN, Fixed::ZERO);
        let near = Vec2Fixed::from_int(100, 100);

        assert_eq!(far.distance_squared(near), Fixed::MAX);
        assert_eq!(near.distance_squared(far), Fixed::MAX);
        let (pos, arrived) = near.move_towards(far, Fixed::from_num(2));
        assert!(!arrived);
        assert!(pos.x < near.x);
        assert_eq!((far - near).x, Fixed::MIN);
    }

    #[test]
    fn test_millis_to_steps() {
        assert_eq!(millis_to_steps(1000, 60), 60);
        assert_eq!(millis_to_steps(800, 60), 48);
        assert_eq!(millis_to_steps(1500, 60), 90);
        assert_eq!(millis_to_steps(0, 60), 0);
        assert_eq!(millis_to_steps(1, 60), 1);
    }

    #[test]
    fn test_fixed_determinism() {
        let a = Fixed::from_num(1) / Fixed::from_num(3);
        let b = Fixed::from_num(1) / Fixed::from_num(3);
        assert_eq!(a, b);
        assert_eq!(a * Fixed::from_num(7), b * Fixed::from_num(7));
    }
}
