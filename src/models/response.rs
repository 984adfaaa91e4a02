//! Pole-zero-gain transfer-function model.
//!
//! A model is an immutable value. Fitting never edits poles in place: the
//! solver hands back a parameter vector and [`TransferFunctionModel::decode`]
//! builds a fresh model with the selected group replaced. The current and
//! trial models during an iteration therefore never alias.
//!
//! Parameter encoding rules:
//!
//! - every free complex entry contributes `(re, im)`; its conjugate partner is
//!   never encoded and is rebuilt on decode
//! - every free real entry contributes `(re, 0.0)` and stays real on decode
//! - exact duplicates of a real entry share one encoded representative, so a
//!   double pole moves as one variable

use std::f64::consts::PI;
use std::ops::Range;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::domain::{FitRegime, SpectralCurve};
use crate::error::CalError;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Units of the Laplace variable the poles and zeros are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaplaceUnit {
    /// `s = i·2πf`, poles in rad/s.
    #[default]
    Radians,
    /// `s = i·f`, poles in Hz.
    Hertz,
}

impl LaplaceUnit {
    pub fn s(self, freq_hz: f64) -> Complex64 {
        match self {
            LaplaceUnit::Radians => Complex64::new(0.0, 2.0 * PI * freq_hz),
            LaplaceUnit::Hertz => Complex64::new(0.0, freq_hz),
        }
    }

    /// Natural frequency (Hz) of a pole or zero.
    pub fn natural_frequency(self, c: Complex64) -> f64 {
        match self {
            LaplaceUnit::Radians => c.norm() / (2.0 * PI),
            LaplaceUnit::Hertz => c.norm(),
        }
    }
}

/// Serialized form of a response; validated into a [`TransferFunctionModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDescription {
    #[serde(default)]
    pub name: String,
    pub gain: f64,
    pub normalization_freq: f64,
    #[serde(default)]
    pub unit: LaplaceUnit,
    #[serde(default)]
    pub zeros: Vec<Complex64>,
    #[serde(default)]
    pub poles: Vec<Complex64>,
}

/// Which entries of a model are free during a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupSelection {
    pub regime: FitRegime,
    /// Leading free poles of the group that stay fixed.
    pub skip: usize,
    /// Entries with a natural frequency above this cap stay fixed.
    pub max_frequency_hz: Option<f64>,
    /// High regime only: also free non-origin zeros (encoded before poles).
    pub include_zeros: bool,
}

impl GroupSelection {
    pub fn new(regime: FitRegime) -> Self {
        Self {
            regime,
            skip: 0,
            max_frequency_hz: None,
            include_zeros: false,
        }
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_max_frequency(mut self, max_frequency_hz: f64) -> Self {
        self.max_frequency_hz = Some(max_frequency_hz);
        self
    }

    pub fn with_zeros(mut self, include_zeros: bool) -> Self {
        self.include_zeros = include_zeros;
        self
    }
}

impl From<FitRegime> for GroupSelection {
    fn from(regime: FitRegime) -> Self {
        GroupSelection::new(regime)
    }
}

/// One encoded variable pair.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// Complex entry at this index; its conjugate follows at `index + 1`.
    Pair(usize),
    /// Real entry and all exact duplicates of it inside the group.
    Real(Vec<usize>),
}

#[derive(Debug, Clone)]
struct FreeSlots {
    zeros: Vec<Slot>,
    poles: Vec<Slot>,
}

impl FreeSlots {
    fn len(&self) -> usize {
        self.zeros.len() + self.poles.len()
    }
}

/// Immutable pole-zero-gain response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseDescription", into = "ResponseDescription")]
pub struct TransferFunctionModel {
    name: String,
    gain: f64,
    normalization_freq: f64,
    unit: LaplaceUnit,
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    a0: f64,
}

impl TransferFunctionModel {
    /// Build a validated model.
    ///
    /// Fails with `InvalidModel` if a complex pole or zero is not immediately
    /// followed by its exact conjugate, or if any value is non-finite.
    pub fn new(
        gain: f64,
        zeros: Vec<Complex64>,
        poles: Vec<Complex64>,
        normalization_freq: f64,
        unit: LaplaceUnit,
    ) -> Result<Self, CalError> {
        if !gain.is_finite() {
            return Err(CalError::InvalidModel(format!("gain must be finite, got {gain}")));
        }
        if !(normalization_freq.is_finite() && normalization_freq > 0.0) {
            return Err(CalError::InvalidModel(format!(
                "normalization frequency must be finite and > 0, got {normalization_freq}"
            )));
        }
        check_conjugate_pairs(&zeros, "zero")?;
        check_conjugate_pairs(&poles, "pole")?;

        let mut model = Self {
            name: String::new(),
            gain,
            normalization_freq,
            unit,
            zeros,
            poles,
            a0: 1.0,
        };
        let at_norm = model.rational(unit.s(normalization_freq)).norm();
        if at_norm.is_finite() && at_norm > 0.0 {
            model.a0 = 1.0 / at_norm;
        }
        Ok(model)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn rebuild(&self, zeros: Vec<Complex64>, poles: Vec<Complex64>) -> Result<Self, CalError> {
        Ok(Self::new(self.gain, zeros, poles, self.normalization_freq, self.unit)?.with_name(self.name.clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn normalization_freq(&self) -> f64 {
        self.normalization_freq
    }

    pub fn normalization_factor(&self) -> f64 {
        self.a0
    }

    pub fn unit(&self) -> LaplaceUnit {
        self.unit
    }

    pub fn poles(&self) -> &[Complex64] {
        &self.poles
    }

    pub fn zeros(&self) -> &[Complex64] {
        &self.zeros
    }

    /// Natural frequency (Hz) of the first pole, the long-period corner.
    pub fn corner_frequency(&self) -> Option<f64> {
        self.poles.first().map(|&p| self.unit.natural_frequency(p))
    }

    /// Complex response at `freq_hz`.
    ///
    /// Always finite: a factor that vanishes exactly at `s` cancels against a
    /// vanishing factor on the other side of the fraction, and an unmatched
    /// vanishing pole factor is dropped.
    pub fn evaluate(&self, freq_hz: f64) -> Complex64 {
        self.rational(self.unit.s(freq_hz)) * (self.gain * self.a0)
    }

    pub fn evaluate_curve(&self, frequencies: &[f64]) -> SpectralCurve {
        SpectralCurve::new(
            frequencies.to_vec(),
            frequencies.iter().map(|&f| self.evaluate(f)).collect(),
        )
    }

    fn rational(&self, s: Complex64) -> Complex64 {
        let (num, vanishing_num) = product_of_factors(s, &self.zeros);
        let (den, vanishing_den) = product_of_factors(s, &self.poles);
        if vanishing_num > vanishing_den || den == ZERO {
            return ZERO;
        }
        num / den
    }

    /// Encode the free entries of `regime` with default selection settings.
    pub fn encode_group(&self, regime: FitRegime) -> Vec<f64> {
        self.encode(&GroupSelection::new(regime))
    }

    /// Inverse of [`encode_group`](Self::encode_group).
    pub fn decode_group(&self, vector: &[f64], regime: FitRegime) -> Result<Self, CalError> {
        self.decode(vector, &GroupSelection::new(regime))
    }

    /// Number of encoded `(re, im)` pairs for this selection.
    pub fn free_entries(&self, selection: &GroupSelection) -> usize {
        self.free_slots(selection).len()
    }

    pub fn encode(&self, selection: &GroupSelection) -> Vec<f64> {
        let slots = self.free_slots(selection);
        let mut out = Vec::with_capacity(2 * slots.len());
        encode_slots(&self.zeros, &slots.zeros, &mut out);
        encode_slots(&self.poles, &slots.poles, &mut out);
        out
    }

    /// Build a new model with the selected entries taken from `vector`.
    ///
    /// All entries outside the selection, the gain and the normalization
    /// frequency are copied from `self`.
    pub fn decode(&self, vector: &[f64], selection: &GroupSelection) -> Result<Self, CalError> {
        let slots = self.free_slots(selection);
        let expected = 2 * slots.len();
        if vector.len() != expected {
            return Err(CalError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }

        let (zero_part, pole_part) = vector.split_at(2 * slots.zeros.len());
        let mut zeros = self.zeros.clone();
        let mut poles = self.poles.clone();
        decode_slots(&mut zeros, &slots.zeros, zero_part);
        decode_slots(&mut poles, &slots.poles, pole_part);

        self.rebuild(zeros, poles)
    }

    fn pole_range(&self, regime: FitRegime) -> Range<usize> {
        let split = match self.poles.first() {
            None => 0,
            Some(p) if p.im != 0.0 => 2.min(self.poles.len()),
            Some(_) => 1,
        };
        match regime {
            FitRegime::Low => 0..split,
            FitRegime::High => split..self.poles.len(),
        }
    }

    fn free_slots(&self, selection: &GroupSelection) -> FreeSlots {
        let unit = self.unit;
        let below_cap = |c: Complex64| match selection.max_frequency_hz {
            Some(cap) => unit.natural_frequency(c) <= cap,
            None => true,
        };

        let mut poles = collect_slots(&self.poles, self.pole_range(selection.regime), &below_cap);
        let skip = selection.skip.min(poles.len());
        poles.drain(..skip);

        let zeros = if selection.include_zeros && selection.regime == FitRegime::High {
            collect_slots(&self.zeros, 0..self.zeros.len(), &|c: Complex64| {
                c != ZERO && below_cap(c)
            })
        } else {
            Vec::new()
        };

        FreeSlots { zeros, poles }
    }
}

impl TryFrom<ResponseDescription> for TransferFunctionModel {
    type Error = CalError;

    fn try_from(desc: ResponseDescription) -> Result<Self, Self::Error> {
        Ok(TransferFunctionModel::new(
            desc.gain,
            desc.zeros,
            desc.poles,
            desc.normalization_freq,
            desc.unit,
        )?
        .with_name(desc.name))
    }
}

impl From<TransferFunctionModel> for ResponseDescription {
    fn from(model: TransferFunctionModel) -> Self {
        ResponseDescription {
            name: model.name,
            gain: model.gain,
            normalization_freq: model.normalization_freq,
            unit: model.unit,
            zeros: model.zeros,
            poles: model.poles,
        }
    }
}

fn product_of_factors(s: Complex64, roots: &[Complex64]) -> (Complex64, usize) {
    let mut product = ONE;
    let mut vanishing = 0usize;
    for &root in roots {
        let factor = s - root;
        if factor == ZERO {
            vanishing += 1;
        } else {
            product *= factor;
        }
    }
    (product, vanishing)
}

fn check_conjugate_pairs(values: &[Complex64], kind: &str) -> Result<(), CalError> {
    let mut i = 0;
    while i < values.len() {
        let c = values[i];
        if !(c.re.is_finite() && c.im.is_finite()) {
            return Err(CalError::InvalidModel(format!("{kind} {i} is not finite: {c}")));
        }
        if c.im == 0.0 {
            i += 1;
            continue;
        }
        match values.get(i + 1) {
            Some(&next) if next == c.conj() => i += 2,
            Some(&next) => {
                return Err(CalError::InvalidModel(format!(
                    "{kind} {i} ({c}) is followed by {next}, not its conjugate"
                )));
            }
            None => {
                return Err(CalError::InvalidModel(format!(
                    "{kind} {i} ({c}) has no conjugate partner"
                )));
            }
        }
    }
    Ok(())
}

fn collect_slots(values: &[Complex64], range: Range<usize>, is_free: &dyn Fn(Complex64) -> bool) -> Vec<Slot> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut i = range.start;
    while i < range.end {
        let c = values[i];
        if c.im != 0.0 {
            if is_free(c) {
                slots.push(Slot::Pair(i));
            }
            i += 2;
            continue;
        }

        let duplicate_of = slots.iter_mut().find_map(|slot| match slot {
            Slot::Real(indices) if values[indices[0]] == c => Some(indices),
            _ => None,
        });
        match duplicate_of {
            Some(indices) => indices.push(i),
            None if is_free(c) => slots.push(Slot::Real(vec![i])),
            None => {}
        }
        i += 1;
    }
    slots
}

fn encode_slots(values: &[Complex64], slots: &[Slot], out: &mut Vec<f64>) {
    for slot in slots {
        match slot {
            Slot::Pair(i) => {
                out.push(values[*i].re);
                out.push(values[*i].im);
            }
            Slot::Real(indices) => {
                out.push(values[indices[0]].re);
                out.push(0.0);
            }
        }
    }
}

fn decode_slots(values: &mut [Complex64], slots: &[Slot], vector: &[f64]) {
    for (slot, pair) in slots.iter().zip(vector.chunks_exact(2)) {
        match slot {
            Slot::Pair(i) => {
                let c = Complex64::new(pair[0], pair[1]);
                values[*i] = c;
                values[*i + 1] = c.conj();
            }
            Slot::Real(indices) => {
                for &i in indices {
                    values[i] = Complex64::new(pair[0], 0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    /// Broadband seismometer-like response: a complex long-period pair, a
    /// repeated real pole, a complex high-frequency pair and a lone real pole.
    fn broadband() -> TransferFunctionModel {
        TransferFunctionModel::new(
            2000.0,
            vec![c(0.0, 0.0), c(0.0, 0.0), c(-15.0, 0.0)],
            vec![
                c(-0.037, 0.037),
                c(-0.037, -0.037),
                c(-50.0, 0.0),
                c(-50.0, 0.0),
                c(-220.0, 140.0),
                c(-220.0, -140.0),
                c(-900.0, 0.0),
            ],
            1.0,
            LaplaceUnit::Radians,
        )
        .unwrap()
    }

    #[test]
    fn rejects_unpaired_complex_pole() {
        let err = TransferFunctionModel::new(
            1.0,
            vec![],
            vec![c(-1.0, 2.0), c(-1.0, 2.0)],
            1.0,
            LaplaceUnit::Radians,
        )
        .unwrap_err();
        assert!(matches!(err, CalError::InvalidModel(_)));

        let err = TransferFunctionModel::new(1.0, vec![c(0.0, 3.0)], vec![], 1.0, LaplaceUnit::Radians)
            .unwrap_err();
        assert!(matches!(err, CalError::InvalidModel(_)));
    }

    #[test]
    fn normalized_to_gain_at_reference_frequency() {
        let model = broadband();
        assert_relative_eq!(model.evaluate(1.0).norm(), 2000.0, max_relative = 1e-12);
    }

    #[test]
    fn evaluate_is_finite_at_dc_and_nyquist() {
        let model = broadband();
        for f in [0.0, 20.0] {
            let v = model.evaluate(f);
            assert!(v.re.is_finite() && v.im.is_finite(), "f={f}: {v}");
        }

        // A pole exactly at the origin is hit by s = 0.
        let integrator =
            TransferFunctionModel::new(1.0, vec![], vec![c(0.0, 0.0), c(-3.0, 0.0)], 1.0, LaplaceUnit::Radians)
                .unwrap();
        let v = integrator.evaluate(0.0);
        assert!(v.re.is_finite() && v.im.is_finite());
    }

    #[test]
    fn low_group_encodes_first_pair_only() {
        let model = broadband();
        let v = model.encode_group(FitRegime::Low);
        assert_eq!(v, vec![-0.037, 0.037]);
    }

    #[test]
    fn high_group_skips_partners_and_duplicates() {
        let model = broadband();
        let v = model.encode_group(FitRegime::High);
        assert_eq!(v, vec![-50.0, 0.0, -220.0, 140.0, -900.0, 0.0]);
        assert_eq!(model.free_entries(&FitRegime::High.into()), 3);
    }

    #[test]
    fn corner_frequency_of_first_pole() {
        let model = broadband();
        let expected = (2.0_f64.sqrt() * 0.037) / (2.0 * PI);
        assert_relative_eq!(model.corner_frequency().unwrap(), expected, max_relative = 1e-12);

        let flat = TransferFunctionModel::new(1.0, vec![], vec![], 1.0, LaplaceUnit::Hertz).unwrap();
        assert!(flat.corner_frequency().is_none());
    }

    #[test]
    fn real_only_round_trip_is_identity() {
        let model = TransferFunctionModel::new(
            3.5,
            vec![c(0.0, 0.0)],
            vec![c(-0.2, 0.0), c(-4.0, 0.0), c(-4.0, 0.0), c(-60.0, 0.0)],
            1.0,
            LaplaceUnit::Radians,
        )
        .unwrap();
        for regime in [FitRegime::Low, FitRegime::High] {
            let v = model.encode_group(regime);
            let back = model.decode_group(&v, regime).unwrap();
            assert_eq!(back, model);
            assert_eq!(back.encode_group(regime), v);
        }
    }

    #[test]
    fn decoded_pair_is_exact_conjugate() {
        let model = broadband();
        let decoded = model.decode_group(&[0.0, 1.0], FitRegime::Low).unwrap();
        assert_eq!(decoded.poles()[0], c(0.0, 1.0));
        assert_eq!(decoded.poles()[1], c(0.0, -1.0));
        assert_eq!(&decoded.poles()[2..], &model.poles()[2..]);
        assert_eq!(decoded.zeros(), model.zeros());
        assert_eq!(model.poles()[0], c(-0.037, 0.037));
    }

    #[test]
    fn high_decode_replaces_group_and_duplicates() {
        let model = broadband();
        let decoded = model
            .decode_group(&[-49.0, 0.0, -219.0, 139.0, -899.0, 0.0], FitRegime::High)
            .unwrap();
        let poles = decoded.poles();
        assert_eq!(&poles[..2], &model.poles()[..2]);
        assert_eq!(poles[2], c(-49.0, 0.0));
        assert_eq!(poles[3], c(-49.0, 0.0));
        assert_eq!(poles[4], c(-219.0, 139.0));
        assert_eq!(poles[5], c(-219.0, -139.0));
        assert_eq!(poles[6], c(-899.0, 0.0));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let model = broadband();
        let err = model.decode_group(&[1.0, 2.0, 3.0], FitRegime::Low).unwrap_err();
        assert_eq!(err, CalError::DimensionMismatch { expected: 2, got: 3 });
    }

    #[test]
    fn selection_caps_frequency_skips_and_frees_zeros() {
        let model = broadband();
        // -900 rad/s is ~143 Hz, above a 100 Hz cap.
        let sel = GroupSelection::new(FitRegime::High)
            .with_max_frequency(100.0)
            .with_zeros(true);
        assert_eq!(model.encode(&sel), vec![-15.0, 0.0, -50.0, 0.0, -220.0, 140.0]);

        let skipped = sel.with_skip(1);
        assert_eq!(model.encode(&skipped), vec![-15.0, 0.0, -220.0, 140.0]);

        let decoded = model.decode(&[-14.0, 0.0, -210.0, 130.0], &skipped).unwrap();
        assert_eq!(decoded.zeros()[2], c(-14.0, 0.0));
        assert_eq!(decoded.poles()[2], c(-50.0, 0.0));
        assert_eq!(decoded.poles()[5], c(-210.0, -130.0));
        assert_eq!(decoded.poles()[6], c(-900.0, 0.0));
    }

    #[test]
    fn json_round_trip_validates() {
        let model = broadband().with_name("BB-TEST");
        let json = serde_json::to_string(&model).unwrap();
        let back: TransferFunctionModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);

        let bad = r#"{"gain":1.0,"normalization_freq":1.0,"poles":[[-1.0,1.0]]}"#;
        assert!(serde_json::from_str::<TransferFunctionModel>(bad).is_err());
    }
}
