//! Taper windows applied to each Welch segment.

use std::f64::consts::PI;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Hann window over the whole segment.
    #[default]
    Hann,
    /// Cosine taper over the outer 10 % of each end, flat in between.
    CosineTaper,
    /// No taper.
    Rectangular,
}

/// Fraction of the segment tapered at each end by [`WindowKind::CosineTaper`].
pub const COSINE_TAPER_FRACTION: f64 = 0.1;

impl WindowKind {
    /// Window coefficients for a segment of length `n`.
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        match self {
            WindowKind::Hann => hann(n),
            WindowKind::CosineTaper => cosine_taper(n, COSINE_TAPER_FRACTION),
            WindowKind::Rectangular => vec![1.0; n],
        }
    }
}

/// Periodic Hann window (the form used for overlapped spectral averaging).
pub fn hann(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Tukey-style taper: half-cosine ramps over `fraction` of each end.
pub fn cosine_taper(n: usize, fraction: f64) -> Vec<f64> {
    let ramp = ((n as f64) * fraction.clamp(0.0, 0.5)).floor() as usize;
    let mut w = vec![1.0; n];
    if ramp == 0 {
        return w;
    }
    for i in 0..ramp {
        let v = 0.5 * (1.0 - (PI * i as f64 / ramp as f64).cos());
        w[i] = v;
        w[n - 1 - i] = v;
    }
    w
}

/// Energy of a window, `Σ w²`.
pub fn energy(window: &[f64]) -> f64 {
    window.iter().map(|w| w * w).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_energy_is_three_eighths_of_length() {
        let w = hann(1024);
        assert!((energy(&w) - 0.375 * 1024.0).abs() < 1e-9);
        assert_eq!(w[0], 0.0);
    }

    #[test]
    fn cosine_taper_is_flat_in_the_middle() {
        let w = cosine_taper(100, 0.1);
        assert_eq!(w[0], 0.0);
        assert_eq!(w[99], 0.0);
        assert!(w[10..90].iter().all(|&v| v == 1.0));
    }
}
