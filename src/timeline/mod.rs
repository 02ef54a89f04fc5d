pub mod store;

pub use store::TimelineStore;

use serde::{Deserialize, Serialize};

use crate::audio::{BeatProfile, DetectedBeat, SourceIdentity};

/// Identity of a persisted timeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimelineKey {
    pub source: SourceIdentity,
    pub profile: BeatProfile,
}

impl TimelineKey {
    pub fn new(source: SourceIdentity, profile: BeatProfile) -> Self {
        Self { source, profile }
    }
}

/// Beats of one (source, profile) pair, sorted by timestamp. Never mutated
/// after construction; re-analysis produces a new timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct BeatTimeline {
    key: TimelineKey,
    beats: Vec<DetectedBeat>,
}

impl BeatTimeline {
    /// Builds a timeline, re-sorting out-of-order input.
    pub fn new(key: TimelineKey, mut beats: Vec<DetectedBeat>) -> Self {
        if !beats.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms) {
            log::warn!("Timeline for {} [{}] was unsorted; re-sorting", key.source, key.profile);
            beats.sort_by_key(|b| b.timestamp_ms);
        }
        Self { key, beats }
    }

    pub fn key(&self) -> &TimelineKey {
        &self.key
    }

    pub fn profile(&self) -> BeatProfile {
        self.key.profile
    }

    pub fn beats(&self) -> &[DetectedBeat] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn summary(&self) -> TimelineSummary {
        let intervals: Vec<i64> = self
            .beats
            .windows(2)
            .map(|w| w[1].timestamp_ms - w[0].timestamp_ms)
            .collect();

        let mean_interval_ms = if intervals.is_empty() {
            None
        } else {
            Some(intervals.iter().sum::<i64>() as f64 / intervals.len() as f64)
        };

        // Median interval, restricted to 60-200 BPM like a tap tempo would be
        let mut reasonable: Vec<i64> = intervals.into_iter().filter(|&i| (300..=1000).contains(&i)).collect();
        reasonable.sort_unstable();
        let tempo_bpm = reasonable.get(reasonable.len() / 2).map(|&median| 60_000.0 / median as f64);

        TimelineSummary {
            beats: self.beats.len(),
            first_ms: self.beats.first().map(|b| b.timestamp_ms),
            last_ms: self.beats.last().map(|b| b.timestamp_ms),
            mean_interval_ms,
            tempo_bpm,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimelineSummary {
    pub beats: usize,
    pub first_ms: Option<i64>,
    pub last_ms: Option<i64>,
    pub mean_interval_ms: Option<f64>,
    pub tempo_bpm: Option<f64>,
}
