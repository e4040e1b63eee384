//! # Input Sanitization
//!
//! Stateless checks applied to every client number before it reaches the
//! validator or the canonical state.
//!
//! ## Philosophy
//!
//! NEVER trust the client. The client says "I am at X".
//! We verify:
//! 1. Is X a real number?
//! 2. Is X inside the world?
//! 3. Is the text printable and bounded?

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use tessera_shared::{Rotation, Vec3, WorldGrid};

/// Why a client value was refused.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum Rejection {
    /// NaN or infinite component.
    #[error("non-finite {0}")]
    NonFinite(&'static str),

    /// Moved faster than allowed since the last accepted position.
    #[error("moved at {speed:.2} u/s, limit {limit:.2} u/s")]
    TooFast {
        /// Observed speed on the axis that broke its limit
        speed: f32,
        /// Limit including tolerance
        limit: f32,
    },
}

/// Rejects non-finite positions and clamps the rest into the world.
///
/// # Errors
///
/// [`Rejection::NonFinite`] if any component is NaN or infinite.
pub fn sanitize_position(position: Vec3, grid: &WorldGrid) -> Result<Vec3, Rejection> {
    if !position.is_finite() {
        return Err(Rejection::NonFinite("position"));
    }
    Ok(grid.clamp(position))
}

/// Rejects non-finite velocities and caps the magnitude at `max`.
///
/// # Errors
///
/// [`Rejection::NonFinite`] if any component is NaN or infinite.
pub fn sanitize_velocity(velocity: Vec3, max: f32) -> Result<Vec3, Rejection> {
    if !velocity.is_finite() {
        return Err(Rejection::NonFinite("velocity"));
    }
    let len = velocity.length();
    Ok(if len > max { velocity * (max / len) } else { velocity })
}

/// Wraps yaw into `(-PI, PI]` and clamps pitch to straight up/down.
///
/// # Errors
///
/// [`Rejection::NonFinite`] if either angle is NaN or infinite.
pub fn sanitize_rotation(rotation: Rotation) -> Result<Rotation, Rejection> {
    if !rotation.is_finite() {
        return Err(Rejection::NonFinite("rotation"));
    }
    let mut yaw = rotation.yaw.rem_euclid(TAU);
    if yaw > PI {
        yaw -= TAU;
    }
    Ok(Rotation::new(yaw, rotation.pitch.clamp(-FRAC_PI_2, FRAC_PI_2)))
}

/// Trims, strips control characters and caps length in characters.
///
/// Returns `None` when nothing printable is left.
#[must_use]
pub fn sanitize_chat(text: &str, max_chars: usize) -> Option<String> {
    let cleaned: String = text
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect();
    let cleaned = cleaned.trim_end();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_rejects_non_finite() {
        let grid = WorldGrid::new(64.0, 768.0);
        assert_eq!(
            sanitize_position(Vec3::new(f32::NAN, 0.0, 0.0), &grid),
            Err(Rejection::NonFinite("position"))
        );
        assert!(sanitize_position(Vec3::new(0.0, f32::INFINITY, 0.0), &grid).is_err());
    }

    #[test]
    fn test_position_clamped_to_world() {
        let grid = WorldGrid::new(64.0, 768.0);
        let p = sanitize_position(Vec3::new(10_000.0, 2.0, -10_000.0), &grid).unwrap();
        assert!(grid.contains(p));
        assert_eq!(p.y, 2.0);

        let inside = Vec3::new(31.0, 0.0, 31.0);
        assert_eq!(sanitize_position(inside, &grid), Ok(inside));
    }

    #[test]
    fn test_velocity_capped() {
        let v = sanitize_velocity(Vec3::new(30.0, 40.0, 0.0), 10.0).unwrap();
        assert!((v.length() - 10.0).abs() < 1e-4);
        assert!(sanitize_velocity(Vec3::new(0.0, f32::NAN, 0.0), 10.0).is_err());
    }

    #[test]
    fn test_rotation_wrapped_and_clamped() {
        let r = sanitize_rotation(Rotation::new(TAU + 0.5, 4.0)).unwrap();
        assert!((r.yaw - 0.5).abs() < 1e-4);
        assert_eq!(r.pitch, FRAC_PI_2);

        let r = sanitize_rotation(Rotation::new(-0.5, -0.2)).unwrap();
        assert!((r.yaw + 0.5).abs() < 1e-5);
        assert!(sanitize_rotation(Rotation::new(f32::NAN, 0.0)).is_err());
    }

    #[test]
    fn test_chat_sanitized() {
        assert_eq!(sanitize_chat("  hello\tworld \n", 200).as_deref(), Some("hello world"));
        assert_eq!(sanitize_chat("bell\u{7}", 200).as_deref(), Some("bell"));
        assert_eq!(sanitize_chat("abcdef", 3).as_deref(), Some("abc"));
        assert_eq!(sanitize_chat("   \u{0}  ", 200), None);
        assert_eq!(sanitize_chat("héllo", 2).as_deref(), Some("hé"));
    }
}
