//! Amplitude and phase helpers for complex response curves.

use num_complex::Complex64;

/// Amplitude in decibels, `20·log10|v|`, floored to stay finite at zero.
pub fn amplitude_db(v: Complex64) -> f64 {
    20.0 * v.norm().max(f64::MIN_POSITIVE).log10()
}

/// Phase in degrees, unwrapped along the sequence.
pub fn unwrapped_phase_degrees(values: &[Complex64]) -> Vec<f64> {
    let raw: Vec<f64> = values.iter().map(|v| v.arg().to_degrees()).collect();
    unwrap(&raw, 360.0)
}

/// Remove jumps larger than half a period between consecutive samples.
pub fn unwrap(x: &[f64], period: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    let Some(&first) = x.first() else {
        return out;
    };
    out.push(first);
    let mut offset = 0.0;
    for pair in x.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > period / 2.0 {
            offset -= period * ((diff - period / 2.0) / period).ceil();
        } else if diff < -period / 2.0 {
            offset += period * ((-diff - period / 2.0) / period).ceil();
        }
        out.push(pair[1] + offset);
    }
    out
}

/// Shift `phase` by a whole number of periods so its first value lies within
/// half a period of `reference`.
pub fn align_to(phase: &mut [f64], reference: f64, period: f64) {
    let Some(&first) = phase.first() else {
        return;
    };
    let turns = ((reference - first) / period).round();
    if turns != 0.0 {
        for p in phase.iter_mut() {
            *p += turns * period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_removes_wraparound() {
        let wrapped = [170.0, 179.0, -172.0, -160.0];
        let un = unwrap(&wrapped, 360.0);
        assert_eq!(un, vec![170.0, 179.0, 188.0, 200.0]);
    }

    #[test]
    fn align_shifts_by_full_turns() {
        let mut phase = vec![-350.0, -340.0];
        align_to(&mut phase, 5.0, 360.0);
        assert_eq!(phase, vec![10.0, 20.0]);
    }

    #[test]
    fn amplitude_db_of_zero_is_finite() {
        assert!(amplitude_db(Complex64::new(0.0, 0.0)).is_finite());
        assert!((amplitude_db(Complex64::new(10.0, 0.0)) - 20.0).abs() < 1e-12);
    }
}
