//! Welch-averaged power and cross-power spectra.
//!
//! Each input is cut into overlapping power-of-two segments, every segment is
//! demeaned and tapered, and the per-bin products `conj(FFT(a))·FFT(b)` are
//! averaged. The average is scaled by `Δt / Σw²` so that self-power comes out
//! as a one-sided-free spectral density in `unit²/Hz`.
//!
//! Segments are accumulated in at most [`MAX_PARTIAL_SUMS`] contiguous chunks
//! on the rayon pool, and the chunk sums are added in chunk order. Chunking
//! depends only on the segment count, so output is bit-for-bit deterministic
//! and memory stays bounded for short segments on long records.

use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::domain::SpectralCurve;
use crate::error::CalError;
use crate::math::window::{self, WindowKind};
use crate::models::TransferFunctionModel;

/// Shortest segment the default sizing rule accepts.
pub const MIN_SEGMENT_LEN: usize = 16;

/// Most partial spectra held at once while averaging.
pub const MAX_PARTIAL_SUMS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WelchConfig {
    /// Segment length (power of two). `None` picks the largest power of two
    /// not exceeding a quarter of the input.
    pub segment_len: Option<usize>,
    /// Fractional overlap between consecutive segments, in `[0, 1)`.
    pub overlap: f64,
    pub window: WindowKind,
}

impl Default for WelchConfig {
    fn default() -> Self {
        Self {
            segment_len: None,
            overlap: 0.75,
            window: WindowKind::Hann,
        }
    }
}

/// Resolved segmentation for one input length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmentation {
    pub segment_len: usize,
    pub step: usize,
    pub count: usize,
}

impl WelchConfig {
    pub fn segmentation(&self, len: usize) -> Result<Segmentation, CalError> {
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(CalError::InvalidInput(format!(
                "Welch overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }

        let segment_len = match self.segment_len {
            Some(n) => {
                if n < 2 || !n.is_power_of_two() {
                    return Err(CalError::InvalidInput(format!(
                        "Welch segment length must be a power of two >= 2, got {n}"
                    )));
                }
                n
            }
            None => {
                let quarter = len / 4;
                if quarter < MIN_SEGMENT_LEN {
                    return Err(CalError::InsufficientData(format!(
                        "{len} samples is too short for spectral averaging (need at least {})",
                        4 * MIN_SEGMENT_LEN
                    )));
                }
                1usize << quarter.ilog2()
            }
        };

        if len < segment_len {
            return Err(CalError::InsufficientData(format!(
                "{len} samples is shorter than one {segment_len}-sample analysis window"
            )));
        }

        let step = ((segment_len as f64) * (1.0 - self.overlap)).round().max(1.0) as usize;
        let count = (len - segment_len) / step + 1;
        if count == 0 {
            return Err(CalError::InsufficientData("no complete analysis segments".to_string()));
        }

        Ok(Segmentation {
            segment_len,
            step,
            count,
        })
    }
}

/// Averaged cross-power `conj(A)·B` of two equal-length sequences.
pub fn cross_power(a: &[f64], b: &[f64], interval: f64, config: &WelchConfig) -> Result<SpectralCurve, CalError> {
    if !(interval.is_finite() && interval > 0.0) {
        return Err(CalError::InvalidInput(format!(
            "sample interval must be finite and > 0, got {interval}"
        )));
    }
    if a.len() != b.len() {
        return Err(CalError::ChannelMismatch(format!(
            "cross-power inputs differ in length ({} vs {})",
            a.len(),
            b.len()
        )));
    }

    let seg = config.segmentation(a.len())?;
    let n = seg.segment_len;
    let bins = n / 2 + 1;
    let taper = config.window.coefficients(n);
    let scale = interval / (seg.count as f64 * window::energy(&taper));
    let same_input = std::ptr::eq(a, b);

    let fft = FftPlanner::<f64>::new().plan_fft_forward(n);

    let chunk_len = seg.count.div_ceil(MAX_PARTIAL_SUMS);
    let partials: Vec<Vec<Complex64>> = (0..seg.count.div_ceil(chunk_len))
        .into_par_iter()
        .map(|chunk| {
            let mut partial = vec![Complex64::new(0.0, 0.0); bins];
            for k in chunk * chunk_len..((chunk + 1) * chunk_len).min(seg.count) {
                let start = k * seg.step;
                let fa = transform_segment(&a[start..start + n], &taper, fft.as_ref());
                if same_input {
                    for (acc, x) in partial.iter_mut().zip(&fa[..bins]) {
                        *acc += x.norm_sqr();
                    }
                } else {
                    let fb = transform_segment(&b[start..start + n], &taper, fft.as_ref());
                    for ((acc, x), y) in partial.iter_mut().zip(&fa[..bins]).zip(&fb[..bins]) {
                        *acc += x.conj() * y;
                    }
                }
            }
            partial
        })
        .collect();

    let mut accum = vec![Complex64::new(0.0, 0.0); bins];
    for partial in &partials {
        for (acc, v) in accum.iter_mut().zip(partial.iter()) {
            *acc += v;
        }
    }
    for v in accum.iter_mut() {
        *v *= scale;
    }

    let frequencies = (0..bins).map(|k| k as f64 / (n as f64 * interval)).collect();
    Ok(SpectralCurve::new(frequencies, accum))
}

/// Averaged self-power; imaginary parts are exactly zero.
pub fn power(a: &[f64], interval: f64, config: &WelchConfig) -> Result<SpectralCurve, CalError> {
    cross_power(a, a, interval, config)
}

fn transform_segment(segment: &[f64], taper: &[f64], fft: &dyn rustfft::Fft<f64>) -> Vec<Complex64> {
    let mean = segment.iter().sum::<f64>() / segment.len() as f64;
    let mut buf: Vec<Complex64> = segment
        .iter()
        .zip(taper.iter())
        .map(|(&x, &w)| Complex64::new((x - mean) * w, 0.0))
        .collect();
    fft.process(&mut buf);
    buf
}

/// Remove the instrument responses of the two channels from a (cross-)power
/// curve by dividing each bin by `|ra(f)|·|rb(f)|`.
///
/// Bins where either response vanishes are set to zero.
pub fn correct_for_responses(
    curve: &SpectralCurve,
    ra: &TransferFunctionModel,
    rb: &TransferFunctionModel,
) -> SpectralCurve {
    let values = curve
        .frequencies
        .iter()
        .zip(curve.values.iter())
        .map(|(&f, &v)| {
            let scale = ra.evaluate(f).norm() * rb.evaluate(f).norm();
            if scale > 0.0 && scale.is_finite() {
                v / scale
            } else {
                Complex64::new(0.0, 0.0)
            }
        })
        .collect();
    SpectralCurve::new(curve.frequencies.clone(), values)
}

/// Pointwise `numer / denom` on a shared grid; zero denominators give zero.
pub fn divide(numer: &SpectralCurve, denom: &SpectralCurve) -> Result<SpectralCurve, CalError> {
    if numer.frequencies != denom.frequencies {
        return Err(CalError::ChannelMismatch(
            "spectral curves are on different frequency grids".to_string(),
        ));
    }
    let values = numer
        .values
        .iter()
        .zip(denom.values.iter())
        .map(|(&n, &d)| {
            if d.norm_sqr() > 0.0 {
                n / d
            } else {
                Complex64::new(0.0, 0.0)
            }
        })
        .collect();
    Ok(SpectralCurve::new(numer.frequencies.clone(), values))
}

/// Log-spaced moving average over `bandwidth_octaves`.
///
/// Each bin at `f > 0` becomes the mean of all bins in
/// `[f / 2^(b/2), f · 2^(b/2)]`. Real and imaginary parts are averaged
/// separately, so phase is never averaged across a ±180° wrap. The DC bin is
/// passed through. A non-positive bandwidth returns an unchanged copy.
pub fn smooth(curve: &SpectralCurve, bandwidth_octaves: f64) -> SpectralCurve {
    if !(bandwidth_octaves.is_finite() && bandwidth_octaves > 0.0) || curve.is_empty() {
        return curve.clone();
    }

    let half = 2f64.powf(bandwidth_octaves / 2.0);
    let mut prefix = Vec::with_capacity(curve.len() + 1);
    prefix.push(Complex64::new(0.0, 0.0));
    let mut running = Complex64::new(0.0, 0.0);
    for v in &curve.values {
        running += v;
        prefix.push(running);
    }

    let freqs = &curve.frequencies;
    let values = freqs
        .iter()
        .enumerate()
        .map(|(k, &f)| {
            if f <= 0.0 {
                return curve.values[k];
            }
            let lo = freqs.partition_point(|&x| x < f / half);
            let hi = freqs.partition_point(|&x| x <= f * half).max(k + 1);
            let lo = lo.min(k);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect();

    SpectralCurve::new(freqs.clone(), values)
}

/// Bins with `lo <= f <= hi`.
pub fn trim(curve: &SpectralCurve, lo: f64, hi: f64) -> SpectralCurve {
    let (frequencies, values) = curve
        .frequencies
        .iter()
        .zip(curve.values.iter())
        .filter(|(f, _)| **f >= lo && **f <= hi)
        .map(|(&f, &v)| (f, v))
        .unzip();
    SpectralCurve::new(frequencies, values)
}

/// Scale a curve so its amplitude at the bin nearest `freq` is one.
pub fn normalize_at(curve: &SpectralCurve, freq: f64) -> Result<SpectralCurve, CalError> {
    let idx = curve
        .nearest_bin(freq)
        .ok_or_else(|| CalError::InsufficientData("cannot normalize an empty curve".to_string()))?;
    let reference = curve.values[idx].norm();
    if !(reference.is_finite() && reference > 0.0) {
        return Err(CalError::NumericalFailure(format!(
            "curve amplitude at {:.6} Hz is {reference}; cannot normalize",
            curve.frequencies[idx]
        )));
    }
    Ok(SpectralCurve::new(
        curve.frequencies.clone(),
        curve.values.iter().map(|v| *v / reference).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synth;
    use crate::models::LaplaceUnit;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn self_power_is_real() {
        let x = synth::white_noise(4096, 1.0, 7);
        let psd = cross_power(&x, &x, 0.05, &WelchConfig::default()).unwrap();
        assert_eq!(psd.len(), 1024 / 2 + 1);
        assert!(psd.values.iter().all(|v| v.im == 0.0));

        // Same values through separate buffers still give a real result.
        let y = x.clone();
        let cross = cross_power(&x, &y, 0.05, &WelchConfig::default()).unwrap();
        assert!(cross.values.iter().all(|v| v.im.abs() <= 1e-12 * v.re.abs().max(1.0)));
    }

    #[test]
    fn white_noise_density_matches_variance() {
        // Unit-variance white noise sampled at Δt has density σ²·Δt in this scaling.
        let dt = 0.1;
        let x = synth::white_noise(1 << 16, 1.0, 11);
        let psd = power(&x, dt, &WelchConfig::default()).unwrap();
        let inner = &psd.values[10..psd.len() - 10];
        let mean = inner.iter().map(|v| v.re).sum::<f64>() / inner.len() as f64;
        assert_relative_eq!(mean, dt, max_relative = 0.05);
    }

    #[test]
    fn sine_peak_lands_on_expected_bin() {
        let dt = 0.01;
        let f0 = 12.5;
        let x: Vec<f64> = (0..8192).map(|i| (2.0 * PI * f0 * i as f64 * dt).sin()).collect();
        let cfg = WelchConfig {
            segment_len: Some(1024),
            ..WelchConfig::default()
        };
        let psd = power(&x, dt, &cfg).unwrap();
        let peak = psd
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.re.partial_cmp(&b.1.re).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!((psd.frequencies[peak] - f0).abs() <= psd.resolution());
    }

    #[test]
    fn short_input_is_insufficient_data() {
        let x = vec![0.0; 40];
        let err = power(&x, 1.0, &WelchConfig::default()).unwrap_err();
        assert!(matches!(err, CalError::InsufficientData(_)));

        let cfg = WelchConfig {
            segment_len: Some(64),
            ..WelchConfig::default()
        };
        let err = power(&x, 1.0, &cfg).unwrap_err();
        assert!(matches!(err, CalError::InsufficientData(_)));
    }

    #[test]
    fn many_short_segments_match_serial_average() {
        let a = synth::white_noise(4096, 1.0, 21);
        let b = synth::white_noise(4096, 1.0, 22);
        let cfg = WelchConfig {
            segment_len: Some(16),
            overlap: 0.0,
            window: WindowKind::Hann,
        };
        assert!(cfg.segmentation(a.len()).unwrap().count > MAX_PARTIAL_SUMS);

        let cross = cross_power(&a, &b, 1.0, &cfg).unwrap();
        assert_eq!(cross.values, cross_power(&a, &b, 1.0, &cfg).unwrap().values);

        let taper = cfg.window.coefficients(16);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(16);
        let mut expected = vec![Complex64::new(0.0, 0.0); 9];
        for start in (0..4096).step_by(16) {
            let fa = transform_segment(&a[start..start + 16], &taper, fft.as_ref());
            let fb = transform_segment(&b[start..start + 16], &taper, fft.as_ref());
            for ((acc, x), y) in expected.iter_mut().zip(&fa).zip(&fb) {
                *acc += x.conj() * y;
            }
        }
        let scale = 1.0 / (256.0 * window::energy(&taper));
        for (got, want) in cross.values.iter().zip(&expected) {
            assert_relative_eq!(got.re, want.re * scale, epsilon = 1e-12);
            assert_relative_eq!(got.im, want.im * scale, epsilon = 1e-12);
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = cross_power(&[0.0; 256], &[0.0; 255], 1.0, &WelchConfig::default()).unwrap_err();
        assert!(matches!(err, CalError::ChannelMismatch(_)));
    }

    #[test]
    fn response_correction_divides_magnitude_squared() {
        let model = TransferFunctionModel::new(
            4.0,
            vec![],
            vec![Complex64::new(-2.0, 0.0)],
            1.0,
            LaplaceUnit::Radians,
        )
        .unwrap();
        let curve = SpectralCurve::new(vec![0.5, 1.0], vec![Complex64::new(8.0, 0.0); 2]);
        let corrected = correct_for_responses(&curve, &model, &model);
        assert_relative_eq!(corrected.values[1].re, 8.0 / 16.0, max_relative = 1e-12);
    }

    #[test]
    fn smoothing_twice_changes_less_than_once() {
        let x = synth::white_noise(1 << 14, 1.0, 3);
        let raw = power(&x, 1.0, &WelchConfig::default()).unwrap();
        let once = smooth(&raw, 0.5);
        let twice = smooth(&once, 0.5);

        let change = |a: &SpectralCurve, b: &SpectralCurve| -> f64 {
            a.values.iter().zip(b.values.iter()).map(|(x, y)| (x - y).norm()).sum()
        };
        let first = change(&raw, &once);
        let second = change(&once, &twice);
        assert!(second < first, "second pass {second} vs first pass {first}");
        assert_eq!(once.values[0], raw.values[0]);
    }

    #[test]
    fn smoothing_keeps_constant_curve() {
        let curve = SpectralCurve::new(
            (0..50).map(|k| k as f64 * 0.1).collect(),
            vec![Complex64::new(1.0, -2.0); 50],
        );
        let smoothed = smooth(&curve, 1.0);
        for v in smoothed.values {
            assert_relative_eq!(v.re, 1.0, epsilon = 1e-12);
            assert_relative_eq!(v.im, -2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn normalize_and_trim() {
        let curve = SpectralCurve::new(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![
                Complex64::new(1.0, 0.0),
                Complex64::new(0.0, 2.0),
                Complex64::new(4.0, 0.0),
                Complex64::new(8.0, 0.0),
            ],
        );
        let norm = normalize_at(&curve, 1.1).unwrap();
        assert_relative_eq!(norm.values[1].norm(), 1.0);
        let trimmed = trim(&norm, 0.5, 2.5);
        assert_eq!(trimmed.frequencies, vec![1.0, 2.0]);
    }
}
