use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::spectrum::Spectrum;
use crate::config::AnalysisConfig;

/// Logical channel a beat is aimed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatChannel {
    Left,
    Right,
    Both,
}

/// One detected rhythmic event.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedBeat {
    pub timestamp_ms: i64,
    /// Strength in 0.0-1.0
    pub intensity: f32,
    pub duration_ms: i32,
    pub channel: BeatChannel,
}

impl DetectedBeat {
    pub fn end_ms(&self) -> i64 {
        self.timestamp_ms + i64::from(self.duration_ms)
    }

    pub fn contains(&self, position_ms: i64) -> bool {
        position_ms >= self.timestamp_ms && position_ms < self.end_ms()
    }
}

/// Detection profile. The set is closed: every dispatch site matches it
/// exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatProfile {
    Amplitude,
    Drum,
    Bass,
}

impl BeatProfile {
    pub const ALL: [BeatProfile; 3] = [BeatProfile::Amplitude, BeatProfile::Drum, BeatProfile::Bass];

    pub fn name(self) -> &'static str {
        match self {
            BeatProfile::Amplitude => "amplitude",
            BeatProfile::Drum => "drum",
            BeatProfile::Bass => "bass",
        }
    }

    /// Evaluate one window of interleaved PCM. Returns the candidate beat
    /// (without timestamp) when the window crosses this profile's threshold.
    pub fn evaluate(
        self,
        spectrum: &mut Spectrum,
        samples: &[i16],
        channels: u16,
        sample_rate: u32,
        config: &AnalysisConfig,
    ) -> Option<Candidate> {
        match self {
            BeatProfile::Amplitude => amplitude_beat(peak_amplitude(samples), config.amplitude_threshold),
            BeatProfile::Drum => drum_beat(peak_amplitude(samples), config.drum_threshold),
            BeatProfile::Bass => {
                let energy = spectrum.magnitude_in_band(
                    samples,
                    channels,
                    sample_rate,
                    config.bass_low_hz,
                    config.bass_high_hz,
                );
                bass_beat(energy, config.bass_threshold)
            }
        }
    }
}

impl fmt::Display for BeatProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BeatProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amplitude" => Ok(BeatProfile::Amplitude),
            "drum" => Ok(BeatProfile::Drum),
            "bass" => Ok(BeatProfile::Bass),
            other => Err(format!("unknown profile '{}' (expected amplitude, drum or bass)", other)),
        }
    }
}

/// A window that passed its profile threshold, before refractory filtering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub intensity: f32,
    pub duration_ms: i32,
    pub channel: BeatChannel,
}

impl Candidate {
    pub fn at(self, timestamp_ms: i64) -> DetectedBeat {
        DetectedBeat {
            timestamp_ms,
            intensity: self.intensity,
            duration_ms: self.duration_ms,
            channel: self.channel,
        }
    }
}

const AMPLITUDE_DURATION_MS: i32 = 100;
const DRUM_DURATION_MS: i32 = 150;
const BASS_DURATION_MS: i32 = 300;
const BASS_GAIN: f64 = 1.5;

/// Peak absolute sample, normalized to 0.0-1.0.
pub fn peak_amplitude(samples: &[i16]) -> f32 {
    let peak = samples
        .iter()
        .map(|&s| i32::from(s).unsigned_abs())
        .max()
        .unwrap_or(0);
    (peak as f32 / 32768.0).min(1.0)
}

pub fn amplitude_beat(peak: f32, threshold: f32) -> Option<Candidate> {
    (peak > threshold).then_some(Candidate {
        intensity: peak,
        duration_ms: AMPLITUDE_DURATION_MS,
        channel: BeatChannel::Both,
    })
}

/// Transient proxy: same peak measure as amplitude, stricter threshold.
pub fn drum_beat(peak: f32, threshold: f32) -> Option<Candidate> {
    (peak > threshold).then_some(Candidate {
        intensity: peak,
        duration_ms: DRUM_DURATION_MS,
        channel: BeatChannel::Both,
    })
}

pub fn bass_beat(energy: f64, threshold: f64) -> Option<Candidate> {
    (energy > threshold).then_some(Candidate {
        intensity: (energy * BASS_GAIN).min(1.0) as f32,
        duration_ms: BASS_DURATION_MS,
        channel: BeatChannel::Both,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_threshold_is_exclusive() {
        assert!(amplitude_beat(0.6, 0.6).is_none());

        let beat = amplitude_beat(0.60001, 0.6).unwrap();
        assert_eq!(beat.intensity, 0.60001);
        assert_eq!(beat.duration_ms, 100);
        assert_eq!(beat.channel, BeatChannel::Both);
    }

    #[test]
    fn drum_needs_stronger_transient() {
        assert!(drum_beat(0.7, 0.8).is_none());
        let beat = drum_beat(0.9, 0.8).unwrap();
        assert_eq!(beat.duration_ms, 150);
    }

    #[test]
    fn bass_intensity_saturates() {
        assert!(bass_beat(50.0, 50.0).is_none());
        let beat = bass_beat(50.5, 50.0).unwrap();
        assert_eq!(beat.intensity, 1.0);
        assert_eq!(beat.duration_ms, 300);

        let soft = bass_beat(0.4, 0.2).unwrap();
        assert!((soft.intensity - 0.6).abs() < 1e-6);
    }

    #[test]
    fn peak_handles_i16_min() {
        assert_eq!(peak_amplitude(&[i16::MIN, 0, 100]), 1.0);
        assert_eq!(peak_amplitude(&[]), 0.0);
    }

    #[test]
    fn beat_interval_is_half_open() {
        let beat = DetectedBeat {
            timestamp_ms: 1000,
            intensity: 0.5,
            duration_ms: 100,
            channel: BeatChannel::Left,
        };
        assert!(beat.contains(1000));
        assert!(beat.contains(1099));
        assert!(!beat.contains(1100));
        assert!(!beat.contains(999));
    }

    #[test]
    fn profile_parses_case_insensitively() {
        assert_eq!("Bass".parse::<BeatProfile>().unwrap(), BeatProfile::Bass);
        assert!("snare".parse::<BeatProfile>().is_err());
    }
}
