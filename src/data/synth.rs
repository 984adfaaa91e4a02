//! Synthetic calibration signals.
//!
//! Used by the `simulate` subcommand and by the end-to-end tests: a known
//! response is applied to seeded white noise so a fit can be checked against
//! the poles that generated the data.

use std::f64::consts::PI;

use num_complex::Complex64;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rustfft::FftPlanner;

use crate::error::CalError;
use crate::models::TransferFunctionModel;

/// Seeded Gaussian white noise with standard deviation `sigma`.
pub fn white_noise(len: usize, sigma: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| {
            let z: f64 = rng.sample(StandardNormal);
            sigma * z
        })
        .collect()
}

/// `amplitude · sin(2πft + phase)` sampled every `interval` seconds.
pub fn sine(len: usize, interval: f64, freq_hz: f64, amplitude: f64, phase: f64) -> Vec<f64> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * freq_hz * i as f64 * interval + phase).sin())
        .collect()
}

/// Filter `input` through `model` in the frequency domain.
///
/// The whole record is transformed at once; negative-frequency bins use the
/// conjugate response so the output stays real. The filter is circular, which
/// is harmless for stationary noise.
pub fn apply_response(input: &[f64], interval: f64, model: &TransferFunctionModel) -> Result<Vec<f64>, CalError> {
    if input.is_empty() {
        return Err(CalError::InsufficientData("cannot filter an empty signal".to_string()));
    }
    if !(interval.is_finite() && interval > 0.0) {
        return Err(CalError::InvalidInput(format!(
            "sample interval must be finite and > 0, got {interval}"
        )));
    }

    let n = input.len();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex64> = input.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    forward.process(&mut buf);

    let df = 1.0 / (n as f64 * interval);
    for (k, v) in buf.iter_mut().enumerate() {
        let response = if k <= n / 2 {
            model.evaluate(k as f64 * df)
        } else {
            model.evaluate((n - k) as f64 * df).conj()
        };
        *v *= response;
    }

    inverse.process(&mut buf);
    let scale = 1.0 / n as f64;
    Ok(buf.iter().map(|v| v.re * scale).collect())
}

/// A random-calibration record pair: seeded noise and the sensor's answer.
pub fn random_calibration(
    model: &TransferFunctionModel,
    len: usize,
    interval: f64,
    sigma: f64,
    seed: u64,
) -> Result<(Vec<f64>, Vec<f64>), CalError> {
    let cal = white_noise(len, sigma, seed);
    let out = apply_response(&cal, interval, model)?;
    Ok((cal, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LaplaceUnit;
    use approx::assert_relative_eq;

    #[test]
    fn noise_is_reproducible() {
        let a = white_noise(64, 2.0, 42);
        let b = white_noise(64, 2.0, 42);
        let c = white_noise(64, 2.0, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn flat_response_is_identity() {
        let model = TransferFunctionModel::new(1.0, vec![], vec![], 1.0, LaplaceUnit::Radians).unwrap();
        let x = white_noise(500, 1.0, 1);
        let y = apply_response(&x, 0.01, &model).unwrap();
        for (a, b) in x.iter().zip(y.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn sine_is_scaled_by_response_amplitude() {
        // Single real pole at -2π rad/s: |H(1 Hz)| relative to the norm at 1 Hz is 1.
        let model = TransferFunctionModel::new(
            3.0,
            vec![],
            vec![Complex64::new(-2.0 * PI, 0.0)],
            1.0,
            LaplaceUnit::Radians,
        )
        .unwrap();
        let dt = 1.0 / 64.0;
        let x = sine(1024, dt, 1.0, 1.0, 0.0);
        let y = apply_response(&x, dt, &model).unwrap();
        let peak = y.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert_relative_eq!(peak, 3.0, max_relative = 1e-3);
    }
}
