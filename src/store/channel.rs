//! A single recorded channel.

use chrono::{DateTime, Duration, Utc};

use crate::error::CalError;

/// Evenly sampled, immutable time series.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    samples: Vec<f64>,
    interval: f64,
    start: DateTime<Utc>,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        samples: Vec<f64>,
        interval: f64,
        start: DateTime<Utc>,
    ) -> Result<Self, CalError> {
        let name = name.into();
        if samples.is_empty() {
            return Err(CalError::InvalidInput(format!("channel '{name}' has no samples")));
        }
        if !(interval.is_finite() && interval > 0.0) {
            return Err(CalError::InvalidInput(format!(
                "channel '{name}' has invalid sample interval {interval}"
            )));
        }
        Ok(Self {
            name,
            samples,
            interval,
            start,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn sample_rate(&self) -> f64 {
        1.0 / self.interval
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Timestamp of the last sample.
    pub fn end(&self) -> DateTime<Utc> {
        self.time_at(self.samples.len().saturating_sub(1))
    }

    pub fn time_at(&self, index: usize) -> DateTime<Utc> {
        self.start + seconds(index as f64 * self.interval)
    }

    /// Samples whose timestamps fall in `[from, to]`.
    pub fn trimmed(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, CalError> {
        let offset = |t: DateTime<Utc>| (t - self.start).num_nanoseconds().unwrap_or(i64::MAX) as f64 * 1e-9 / self.interval;

        let first = (offset(from) - 1e-6).ceil().max(0.0) as usize;
        let last = (offset(to) + 1e-6).floor();
        if last < 0.0 || first >= self.samples.len() || (last as usize) < first {
            return Err(CalError::InsufficientData(format!(
                "channel '{}' has no samples between {from} and {to}",
                self.name
            )));
        }
        let last = (last as usize).min(self.samples.len() - 1);

        Ok(Self {
            name: self.name.clone(),
            samples: self.samples[first..=last].to_vec(),
            interval: self.interval,
            start: self.time_at(first),
        })
    }

    /// First `len` samples.
    pub fn truncated(&self, len: usize) -> Self {
        let mut out = self.clone();
        out.samples.truncate(len.max(1));
        out
    }

    /// Resample to `target_interval` by averaging whole blocks of samples.
    ///
    /// The target must be an integer multiple of the current interval.
    pub fn decimated(&self, target_interval: f64) -> Result<Self, CalError> {
        let ratio = target_interval / self.interval;
        let factor = ratio.round();
        if factor < 1.0 || (ratio - factor).abs() > 1e-6 * ratio {
            return Err(CalError::ChannelMismatch(format!(
                "channel '{}' interval {} s cannot be decimated to {} s",
                self.name, self.interval, target_interval
            )));
        }
        let factor = factor as usize;
        if factor == 1 {
            return Ok(self.clone());
        }
        if self.samples.len() < factor {
            return Err(CalError::InsufficientData(format!(
                "channel '{}' is shorter than one decimation block",
                self.name
            )));
        }

        let samples = self
            .samples
            .chunks_exact(factor)
            .map(|block| block.iter().sum::<f64>() / factor as f64)
            .collect();
        Ok(Self {
            name: self.name.clone(),
            samples,
            interval: target_interval,
            start: self.start,
        })
    }
}

fn seconds(s: f64) -> Duration {
    Duration::nanoseconds((s * 1e9).round() as i64)
}
