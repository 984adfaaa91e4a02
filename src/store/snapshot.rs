//! Fixed-slot snapshot of the channels and responses an experiment reads.
//!
//! A store is an immutable value: every setter returns a new store, and the
//! channels inside are `Arc`-shared, so handing a store to an experiment is a
//! cheap clone and later edits by the caller are never observed by it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::CalError;
use crate::models::TransferFunctionModel;
use crate::store::Channel;

/// Number of channel slots.
pub const FILE_COUNT: usize = 9;

#[derive(Debug, Clone, Default)]
pub struct ChannelStore {
    channels: [Option<Arc<Channel>>; FILE_COUNT],
    responses: [Option<Arc<TransferFunctionModel>>; FILE_COUNT],
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(&self, idx: usize, channel: Channel) -> Result<Self, CalError> {
        check_slot(idx)?;
        let mut next = self.clone();
        next.channels[idx] = Some(Arc::new(channel));
        Ok(next)
    }

    pub fn with_response(&self, idx: usize, response: TransferFunctionModel) -> Result<Self, CalError> {
        check_slot(idx)?;
        let mut next = self.clone();
        next.responses[idx] = Some(Arc::new(response));
        Ok(next)
    }

    /// Clear a slot's channel; its response stays.
    pub fn without_channel(&self, idx: usize) -> Result<Self, CalError> {
        check_slot(idx)?;
        let mut next = self.clone();
        next.channels[idx] = None;
        Ok(next)
    }

    pub fn channel(&self, idx: usize) -> Option<&Arc<Channel>> {
        self.channels.get(idx).and_then(Option::as_ref)
    }

    /// Channel in `idx`, or `InsufficientData` if the slot is empty.
    pub fn aligned_channel(&self, idx: usize) -> Result<Arc<Channel>, CalError> {
        check_slot(idx)?;
        self.channel(idx)
            .cloned()
            .ok_or_else(|| CalError::InsufficientData(format!("no channel loaded in slot {idx}")))
    }

    pub fn response_for(&self, idx: usize) -> Result<Arc<TransferFunctionModel>, CalError> {
        check_slot(idx)?;
        self.responses[idx]
            .clone()
            .ok_or_else(|| CalError::InsufficientData(format!("no response loaded for slot {idx}")))
    }

    pub fn has_response(&self, idx: usize) -> bool {
        self.responses.get(idx).is_some_and(Option::is_some)
    }

    pub fn is_set(&self, idx: usize) -> bool {
        self.channel(idx).is_some()
    }

    /// Both a channel and a response are present.
    pub fn fully_set(&self, idx: usize) -> bool {
        self.is_set(idx) && self.has_response(idx)
    }

    /// Count of slots, anywhere in the store, that are fully set.
    pub fn number_fully_set(&self) -> usize {
        (0..FILE_COUNT).filter(|&i| self.fully_set(i)).count()
    }

    fn set_channels(&self, limit: usize) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels[..limit.min(FILE_COUNT)].iter().flatten()
    }

    /// Latest start and earliest end among the set channels in `0..limit`.
    ///
    /// `None` when no channel is set or the channels do not overlap.
    pub fn common_time_range(&self, limit: usize) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut channels = self.set_channels(limit).peekable();
        channels.peek()?;
        let (start, end) = channels.fold((DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC), |(s, e), ch| {
            (s.max(ch.start()), e.min(ch.end()))
        });
        (start <= end).then_some((start, end))
    }

    /// Every set channel in `0..limit` cut to `[from, to]`.
    pub fn trimmed(&self, from: DateTime<Utc>, to: DateTime<Utc>, limit: usize) -> Result<Self, CalError> {
        self.map_channels(limit, |ch| ch.trimmed(from, to))
    }

    /// Decimate every set channel in `0..limit` to the coarsest interval.
    pub fn matched_intervals(&self, limit: usize) -> Result<Self, CalError> {
        let coarsest = self
            .set_channels(limit)
            .map(|ch| ch.interval())
            .fold(0.0_f64, f64::max);
        if coarsest == 0.0 {
            return Ok(self.clone());
        }
        self.map_channels(limit, |ch| ch.decimated(coarsest))
    }

    /// Match intervals, trim to the common time range and cut every channel
    /// in `0..limit` to the same length.
    pub fn aligned(&self, limit: usize) -> Result<Self, CalError> {
        let matched = self.matched_intervals(limit)?;
        let (from, to) = matched.common_time_range(limit).ok_or_else(|| {
            CalError::ChannelMismatch("loaded channels do not overlap in time".to_string())
        })?;
        let trimmed = matched.trimmed(from, to, limit)?;
        let shortest = trimmed.set_channels(limit).map(|ch| ch.len()).min().unwrap_or(0);
        trimmed.map_channels(limit, |ch| Ok(ch.truncated(shortest)))
    }

    fn map_channels<F>(&self, limit: usize, f: F) -> Result<Self, CalError>
    where
        F: Fn(&Channel) -> Result<Channel, CalError>,
    {
        let mut next = self.clone();
        for slot in next.channels[..limit.min(FILE_COUNT)].iter_mut() {
            if let Some(ch) = slot.as_deref() {
                let mapped = f(ch)?;
                *slot = Some(Arc::new(mapped));
            }
        }
        Ok(next)
    }
}

fn check_slot(idx: usize) -> Result<(), CalError> {
    if idx < FILE_COUNT {
        Ok(())
    } else {
        Err(CalError::InvalidInput(format!(
            "slot {idx} is out of range (store holds {FILE_COUNT})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LaplaceUnit;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ramp(name: &str, len: usize, interval: f64, offset_s: i64) -> Channel {
        Channel::new(
            name,
            (0..len).map(|i| i as f64).collect(),
            interval,
            t0() + Duration::seconds(offset_s),
        )
        .unwrap()
    }

    fn flat() -> TransferFunctionModel {
        TransferFunctionModel::new(1.0, vec![], vec![], 1.0, LaplaceUnit::Radians).unwrap()
    }

    #[test]
    fn setters_return_new_stores() {
        let empty = ChannelStore::new();
        let one = empty.with_channel(0, ramp("a", 10, 1.0, 0)).unwrap();
        assert!(!empty.is_set(0));
        assert!(one.is_set(0));
        assert!(!one.fully_set(0));

        let full = one.with_response(0, flat()).unwrap();
        assert!(full.fully_set(0));
        assert_eq!(full.number_fully_set(), 1);

        let cleared = full.without_channel(0).unwrap();
        assert!(!cleared.is_set(0));
        assert!(cleared.has_response(0));
    }

    #[test]
    fn fully_set_count_skips_gaps() {
        let store = ChannelStore::new()
            .with_channel(0, ramp("cal", 10, 1.0, 0))
            .unwrap()
            .with_channel(1, ramp("out", 10, 1.0, 0))
            .unwrap()
            .with_response(1, flat())
            .unwrap()
            .with_channel(4, ramp("aux", 10, 1.0, 0))
            .unwrap()
            .with_response(4, flat())
            .unwrap();
        assert!(!store.fully_set(0));
        assert!(store.fully_set(1));
        assert_eq!(store.number_fully_set(), 2);
    }

    #[test]
    fn missing_slot_is_insufficient_data() {
        let store = ChannelStore::new();
        assert!(matches!(store.aligned_channel(2), Err(CalError::InsufficientData(_))));
        assert!(matches!(store.response_for(0), Err(CalError::InsufficientData(_))));
        assert!(matches!(store.aligned_channel(FILE_COUNT), Err(CalError::InvalidInput(_))));
    }

    #[test]
    fn alignment_yields_common_range_and_equal_lengths() {
        let store = ChannelStore::new()
            .with_channel(0, ramp("a", 100, 1.0, 0))
            .unwrap()
            .with_channel(1, ramp("b", 100, 1.0, 10))
            .unwrap()
            .with_channel(2, ramp("c", 200, 0.5, 5))
            .unwrap();

        let (from, to) = store.common_time_range(3).unwrap();
        assert_eq!(from, t0() + Duration::seconds(10));
        assert_eq!(to, t0() + Duration::seconds(99));

        let aligned = store.aligned(3).unwrap();
        let lens: Vec<usize> = (0..3).map(|i| aligned.aligned_channel(i).unwrap().len()).collect();
        assert!(lens.iter().all(|&l| l == lens[0]), "{lens:?}");
        for i in 0..3 {
            let ch = aligned.aligned_channel(i).unwrap();
            assert!((ch.interval() - 1.0).abs() < 1e-12);
            assert!(ch.start() >= from);
        }
    }

    #[test]
    fn disjoint_channels_have_no_common_range() {
        let store = ChannelStore::new()
            .with_channel(0, ramp("a", 10, 1.0, 0))
            .unwrap()
            .with_channel(1, ramp("b", 10, 1.0, 100))
            .unwrap();
        assert!(store.common_time_range(2).is_none());
        assert!(matches!(store.aligned(2), Err(CalError::ChannelMismatch(_))));
    }
}
