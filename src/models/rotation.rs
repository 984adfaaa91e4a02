//! Planar rotation of a horizontal sensor pair.
//!
//! A horizontal axis at azimuth `θ` (clockwise from the reference north axis)
//! records `north·cos θ + east·sin θ`.

/// Project the pair `(x, y)` onto the axis rotated by `theta` radians from `y`.
///
/// `x` is the east-like component, `y` the north-like component.
pub fn rotate_signal(x: &[f64], y: &[f64], theta: f64) -> Vec<f64> {
    let (sin, cos) = theta.sin_cos();
    x.iter().zip(y.iter()).map(|(&xi, &yi)| xi * sin + yi * cos).collect()
}

/// Wrap an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn rotate_positive_angle() {
        let rot = rotate_signal(&[0.0], &[1.0], PI / 4.0);
        assert!((rot[0] - 0.7071067812).abs() < 1e-9);
    }

    #[test]
    fn rotate_negative_angle() {
        let rot = rotate_signal(&[0.0], &[1.0], -3.0 * PI / 4.0);
        assert!((rot[0] + 0.7071067812).abs() < 1e-9);
    }

    #[test]
    fn rotate_zero_angle_is_identity() {
        let rot = rotate_signal(&[0.0], &[1.0], 0.0);
        assert!((rot[0] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn wrap_degrees_handles_negative() {
        assert!((wrap_degrees(-90.0) - 270.0).abs() < 1e-12);
        assert!((wrap_degrees(720.5) - 0.5).abs() < 1e-12);
    }
}
