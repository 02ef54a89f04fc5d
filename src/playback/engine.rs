//! Playback synchronization: maps the player position onto loaded beat
//! timelines and drives haptic devices once per tick.
//!
//! A tick only reads in-memory timelines. No file access, no decoding.

use super::actuator::HapticActuator;
use super::assignment::DeviceAssignment;
use crate::audio::{DetectedBeat, SourceIdentity};
use crate::config::PlaybackConfig;
use crate::error::{Error, Result};
use crate::resource::{Lease, ResourceSlot};
use crate::timeline::BeatTimeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Loaded,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackPhase {
    fn name(self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Loaded => "loaded",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Stopped => "stopped",
        }
    }
}

/// Read-only view for UIs.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSnapshot {
    pub phase: PlaybackPhase,
    pub position_ms: i64,
    pub is_playing: bool,
    pub source: Option<SourceIdentity>,
    /// Beats that contributed to the last tick, across all profiles.
    pub active_beats: usize,
    pub intensities: Vec<(String, f32)>,
}

struct LoadedTimeline {
    timeline: BeatTimeline,
    /// Longest beat, bounds the backwards scan in lookups.
    max_duration_ms: i64,
}

impl LoadedTimeline {
    fn new(timeline: BeatTimeline) -> Self {
        let max_duration_ms = timeline
            .beats()
            .iter()
            .map(|b| i64::from(b.duration_ms))
            .max()
            .unwrap_or(0);
        Self {
            timeline,
            max_duration_ms,
        }
    }

    /// Beats whose `[timestamp, timestamp + duration)` contains `position_ms`.
    fn active_at(&self, position_ms: i64) -> impl Iterator<Item = &DetectedBeat> {
        let beats = self.timeline.beats();
        let upper = beats.partition_point(|b| b.timestamp_ms <= position_ms);
        let lower = beats[..upper].partition_point(|b| b.timestamp_ms + self.max_duration_ms <= position_ms);
        beats[lower..upper].iter().filter(move |b| b.contains(position_ms))
    }
}

pub struct SyncEngine<A: HapticActuator> {
    config: PlaybackConfig,
    assignment: DeviceAssignment,
    actuator: A,
    _lease: Lease,
    phase: PlaybackPhase,
    source: Option<SourceIdentity>,
    timelines: Vec<LoadedTimeline>,
    position_ms: i64,
    levels: Vec<f32>,
    active_beats: usize,
}

impl<A: HapticActuator> SyncEngine<A> {
    /// Claims the haptic actuator for this session; fails with `Busy` if
    /// another session holds it.
    pub fn new(
        config: PlaybackConfig,
        assignment: DeviceAssignment,
        actuator: A,
        actuator_slot: &ResourceSlot,
    ) -> Result<Self> {
        let lease = actuator_slot.try_acquire()?;
        let levels = vec![0.0; assignment.len()];
        Ok(Self {
            config,
            assignment,
            actuator,
            _lease: lease,
            phase: PlaybackPhase::Idle,
            source: None,
            timelines: Vec::new(),
            position_ms: 0,
            levels,
            active_beats: 0,
        })
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn position_ms(&self) -> i64 {
        self.position_ms
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn set_sync_offset(&mut self, offset_ms: i64) {
        self.config.sync_offset_ms = offset_ms;
    }

    /// Bind timelines for `source`. Timelines for other sources and empty
    /// timelines are ignored; at least one usable timeline is required.
    pub fn load(&mut self, source: SourceIdentity, timelines: Vec<BeatTimeline>) -> Result<()> {
        match self.phase {
            PlaybackPhase::Idle | PlaybackPhase::Loaded | PlaybackPhase::Stopped => {}
            other => return Err(self.invalid("load", other)),
        }

        let usable: Vec<LoadedTimeline> = timelines
            .into_iter()
            .filter(|t| {
                if t.key().source != source {
                    log::warn!("Ignoring timeline for {}, selected source is {}", t.key().source, source);
                    return false;
                }
                if !self.assignment.listens_to(t.profile()) {
                    log::debug!("No device listens to {} beats", t.profile());
                }
                !t.is_empty()
            })
            .map(LoadedTimeline::new)
            .collect();

        if usable.is_empty() {
            return Err(Error::NoTimeline);
        }

        log::debug!(
            "Loaded {} timeline(s), {} beats, for {}",
            usable.len(),
            usable.iter().map(|t| t.timeline.len()).sum::<usize>(),
            source
        );
        self.timelines = usable;
        self.source = Some(source);
        self.position_ms = 0;
        self.phase = PlaybackPhase::Loaded;
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        match self.phase {
            PlaybackPhase::Loaded | PlaybackPhase::Paused => {
                self.transition(PlaybackPhase::Playing);
                Ok(())
            }
            PlaybackPhase::Playing => Ok(()),
            PlaybackPhase::Idle | PlaybackPhase::Stopped => Err(Error::NoTimeline),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.phase {
            PlaybackPhase::Playing => {
                self.transition(PlaybackPhase::Paused);
                self.emit_silence();
                Ok(())
            }
            PlaybackPhase::Paused => Ok(()),
            other => Err(self.invalid("pause", other)),
        }
    }

    /// Silence every device and unload the timelines.
    pub fn stop(&mut self) -> Result<()> {
        match self.phase {
            PlaybackPhase::Loaded | PlaybackPhase::Playing | PlaybackPhase::Paused => {
                self.transition(PlaybackPhase::Stopped);
                self.emit_silence();
                self.timelines.clear();
                Ok(())
            }
            PlaybackPhase::Stopped => Ok(()),
            PlaybackPhase::Idle => Err(self.invalid("stop", PlaybackPhase::Idle)),
        }
    }

    pub fn reset(&mut self) {
        if self.phase != PlaybackPhase::Idle {
            if let Err(e) = self.stop() {
                log::warn!("Stop during reset failed: {}", e);
            }
            self.source = None;
            self.position_ms = 0;
            self.transition(PlaybackPhase::Idle);
        }
    }

    /// Jump to `position_ms`. The next tick reconciles from there; skipped
    /// beats are not replayed.
    pub fn seek(&mut self, position_ms: i64) {
        self.position_ms = position_ms.max(0);
    }

    /// Compute and emit one frame of device intensities for the player
    /// position `position_ms`. Outside `Playing` every device gets zero.
    pub fn tick(&mut self, position_ms: i64) -> &[f32] {
        self.position_ms = position_ms;
        if self.phase == PlaybackPhase::Playing {
            let effective = position_ms - self.config.sync_offset_ms;
            self.compute_levels(effective);
        } else {
            self.levels.iter_mut().for_each(|l| *l = 0.0);
            self.active_beats = 0;
        }
        self.emit();
        &self.levels
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            phase: self.phase,
            position_ms: self.position_ms,
            is_playing: self.phase == PlaybackPhase::Playing,
            source: self.source.clone(),
            active_beats: self.active_beats,
            intensities: self
                .assignment
                .devices()
                .iter()
                .zip(self.levels.iter())
                .map(|(d, &l)| (d.id.clone(), l))
                .collect(),
        }
    }

    fn compute_levels(&mut self, effective_ms: i64) {
        self.levels.iter_mut().for_each(|l| *l = 0.0);
        self.active_beats = 0;
        let master = self.config.master_intensity;

        for loaded in &self.timelines {
            let profile = loaded.timeline.profile();
            for beat in loaded.active_at(effective_ms) {
                self.active_beats += 1;
                let level = (beat.intensity
                    * master
                    * envelope(beat, effective_ms, self.config.lead_in_ms, self.config.lead_out_ms))
                .clamp(0.0, 1.0);
                // Max, not sum: simultaneous profiles must not blow out a device
                for device in self.assignment.targets(profile, beat.channel) {
                    self.levels[device] = self.levels[device].max(level);
                }
            }
        }
    }

    fn emit(&mut self) {
        for (device, &level) in self.assignment.devices().iter().zip(self.levels.iter()) {
            self.actuator.set_intensity(&device.id, level);
        }
    }

    fn emit_silence(&mut self) {
        self.levels.iter_mut().for_each(|l| *l = 0.0);
        self.emit();
    }

    fn transition(&mut self, to: PlaybackPhase) {
        log::debug!("Playback {} -> {}", self.phase.name(), to.name());
        self.phase = to;
    }

    fn invalid(&self, operation: &'static str, state: PlaybackPhase) -> Error {
        Error::InvalidState {
            operation,
            state: state.name(),
        }
    }
}

impl<A: HapticActuator> Drop for SyncEngine<A> {
    fn drop(&mut self) {
        if self.levels.iter().any(|&l| l > 0.0) {
            self.emit_silence();
        }
    }
}

/// Linear attack/release gain in 0.0-1.0 for `position_ms` inside `beat`.
fn envelope(beat: &DetectedBeat, position_ms: i64, lead_in_ms: i64, lead_out_ms: i64) -> f32 {
    let mut gain = 1.0f32;
    if lead_in_ms > 0 {
        gain = gain.min((position_ms - beat.timestamp_ms) as f32 / lead_in_ms as f32);
    }
    if lead_out_ms > 0 {
        gain = gain.min((beat.end_ms() - position_ms) as f32 / lead_out_ms as f32);
    }
    gain.clamp(0.0, 1.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::{BeatChannel, BeatProfile};
    use crate::config::DeviceConfig;
    use crate::playback::DevicePosition;
    use crate::timeline::TimelineKey;
    use std::sync::{Arc, Mutex};

    /// Shares every `set_intensity` call with the test body.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder(pub Arc<Mutex<Vec<(String, f32)>>>);

    impl Recorder {
        pub fn calls(&self) -> Vec<(String, f32)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl HapticActuator for Recorder {
        fn set_intensity(&mut self, device_id: &str, intensity: f32) {
            self.0.lock().unwrap().push((device_id.to_string(), intensity));
        }
    }

    pub(crate) fn source() -> SourceIdentity {
        SourceIdentity::new("/music", "track.mp3")
    }

    pub(crate) fn beat(timestamp_ms: i64, duration_ms: i32, intensity: f32, channel: BeatChannel) -> DetectedBeat {
        DetectedBeat {
            timestamp_ms,
            intensity,
            duration_ms,
            channel,
        }
    }

    pub(crate) fn timeline(profile: BeatProfile, beats: Vec<DetectedBeat>) -> BeatTimeline {
        BeatTimeline::new(TimelineKey::new(source(), profile), beats)
    }

    fn stereo() -> DeviceAssignment {
        DeviceAssignment::new(vec![
            DeviceConfig {
                id: "left".into(),
                position: DevicePosition::Left,
                profiles: BeatProfile::ALL.to_vec(),
            },
            DeviceConfig {
                id: "right".into(),
                position: DevicePosition::Right,
                profiles: vec![BeatProfile::Bass],
            },
        ])
    }

    pub(crate) fn engine(config: PlaybackConfig) -> (SyncEngine<Recorder>, Recorder) {
        let recorder = Recorder::default();
        let slot = ResourceSlot::new("haptic actuator");
        let engine = SyncEngine::new(config, stereo(), recorder.clone(), &slot).unwrap();
        (engine, recorder)
    }

    fn playing(config: PlaybackConfig, timelines: Vec<BeatTimeline>) -> (SyncEngine<Recorder>, Recorder) {
        let (mut engine, recorder) = engine(config);
        engine.load(source(), timelines).unwrap();
        engine.play().unwrap();
        (engine, recorder)
    }

    #[test]
    fn tick_finds_active_beat() {
        let beats = vec![
            beat(1000, 100, 0.9, BeatChannel::Both),
            beat(5000, 300, 0.7, BeatChannel::Both),
        ];
        let (mut engine, _) = playing(PlaybackConfig::default(), vec![timeline(BeatProfile::Drum, beats)]);

        assert!(engine.tick(1050)[0] > 0.0);
        assert_eq!(engine.tick(1200)[0], 0.0);

        engine.set_sync_offset(-100);
        assert!(engine.tick(4950)[0] > 0.0);
    }

    #[test]
    fn each_tick_emits_every_device_once() {
        let (mut engine, recorder) = playing(
            PlaybackConfig::default(),
            vec![timeline(BeatProfile::Drum, vec![beat(0, 100, 0.5, BeatChannel::Both)])],
        );
        engine.tick(10);
        engine.tick(10);
        let calls = recorder.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], ("left".to_string(), 0.5));
        assert_eq!(calls[1], ("right".to_string(), 0.0)); // right only hears bass
        assert_eq!(calls[2], calls[0]);
    }

    #[test]
    fn overlapping_profiles_take_the_maximum() {
        let (mut engine, _) = playing(
            PlaybackConfig::default(),
            vec![
                timeline(BeatProfile::Bass, vec![beat(0, 300, 0.6, BeatChannel::Both)]),
                timeline(BeatProfile::Drum, vec![beat(50, 150, 0.8, BeatChannel::Both)]),
                timeline(BeatProfile::Amplitude, vec![beat(60, 100, 0.7, BeatChannel::Both)]),
            ],
        );
        let levels = engine.tick(100).to_vec();
        assert!((levels[0] - 0.8).abs() < 1e-6);
        assert!((levels[1] - 0.6).abs() < 1e-6);
        assert_eq!(engine.snapshot().active_beats, 3);
    }

    #[test]
    fn panning_routes_one_sided_beats() {
        let (mut engine, _) = playing(
            PlaybackConfig::default(),
            vec![timeline(BeatProfile::Bass, vec![beat(0, 300, 1.0, BeatChannel::Right)])],
        );
        assert_eq!(engine.tick(10), &[0.0, 1.0]);
    }

    #[test]
    fn envelope_ramps_in_and_out() {
        let config = PlaybackConfig {
            lead_in_ms: 100,
            lead_out_ms: 100,
            ..PlaybackConfig::default()
        };
        let (mut engine, _) = playing(config, vec![timeline(BeatProfile::Bass, vec![beat(1000, 300, 1.0, BeatChannel::Both)])]);
        assert_eq!(engine.tick(1000)[0], 0.0);
        assert!((engine.tick(1050)[0] - 0.5).abs() < 1e-6);
        assert_eq!(engine.tick(1150)[0], 1.0);
        assert!((engine.tick(1250)[0] - 0.5).abs() < 1e-6);
        assert_eq!(engine.tick(1300)[0], 0.0);
    }

    #[test]
    fn master_intensity_scales_output() {
        let config = PlaybackConfig {
            master_intensity: 0.5,
            ..PlaybackConfig::default()
        };
        let (mut engine, _) = playing(config, vec![timeline(BeatProfile::Drum, vec![beat(0, 150, 0.8, BeatChannel::Both)])]);
        assert!((engine.tick(10)[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn lookup_handles_long_timelines_and_seeks() {
        let beats: Vec<DetectedBeat> = (0..10_000).map(|i| beat(i * 300, 100, 1.0, BeatChannel::Both)).collect();
        let (mut engine, _) = playing(PlaybackConfig::default(), vec![timeline(BeatProfile::Drum, beats)]);

        assert!(engine.tick(2_999_950)[0] == 0.0);
        engine.seek(150_000);
        assert_eq!(engine.position_ms(), 150_000);
        assert_eq!(engine.tick(150_050)[0], 1.0);
        // Backwards seek reconciles without state
        assert_eq!(engine.tick(600)[0], 1.0);
        assert_eq!(engine.tick(700)[0], 0.0);
    }

    #[test]
    fn play_requires_timeline() {
        let (mut engine, _) = engine(PlaybackConfig::default());
        assert!(matches!(engine.play(), Err(Error::NoTimeline)));

        let empty = timeline(BeatProfile::Drum, vec![]);
        assert!(matches!(engine.load(source(), vec![empty]), Err(Error::NoTimeline)));

        let other = BeatTimeline::new(
            TimelineKey::new(SourceIdentity::new("/music", "other.mp3"), BeatProfile::Drum),
            vec![beat(0, 100, 1.0, BeatChannel::Both)],
        );
        assert!(matches!(engine.load(source(), vec![other]), Err(Error::NoTimeline)));
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
    }

    #[test]
    fn state_machine_round_trip() {
        let (mut engine, recorder) = engine(PlaybackConfig::default());
        engine
            .load(source(), vec![timeline(BeatProfile::Drum, vec![beat(0, 1000, 1.0, BeatChannel::Both)])])
            .unwrap();
        assert_eq!(engine.phase(), PlaybackPhase::Loaded);
        assert_eq!(engine.tick(10)[0], 0.0);

        engine.play().unwrap();
        assert_eq!(engine.tick(10)[0], 1.0);
        assert!(engine.snapshot().is_playing);

        engine.pause().unwrap();
        assert_eq!(recorder.calls().last().unwrap().1, 0.0);
        assert_eq!(engine.tick(20)[0], 0.0);
        assert!(matches!(engine.load(source(), vec![]), Err(Error::InvalidState { .. })));

        engine.play().unwrap();
        engine.stop().unwrap();
        assert_eq!(engine.phase(), PlaybackPhase::Stopped);
        assert!(matches!(engine.play(), Err(Error::NoTimeline)));

        engine.reset();
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
        assert_eq!(engine.snapshot().source, None);
    }

    #[test]
    fn reset_while_playing_silences_then_idles() {
        let beats = vec![beat(0, 1000, 1.0, BeatChannel::Both)];
        let (mut engine, recorder) = playing(PlaybackConfig::default(), vec![timeline(BeatProfile::Bass, beats)]);
        assert_eq!(engine.tick(10), &[1.0, 1.0]);

        engine.reset();
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
        assert_eq!(engine.snapshot().source, None);
        let calls = recorder.calls();
        let tail: Vec<f32> = calls[calls.len() - 2..].iter().map(|(_, level)| *level).collect();
        assert_eq!(tail, vec![0.0, 0.0]);

        // Idle reset is a no-op and emits nothing
        let before = recorder.calls().len();
        engine.reset();
        assert_eq!(engine.phase(), PlaybackPhase::Idle);
        assert_eq!(recorder.calls().len(), before);
    }

    #[test]
    fn second_session_is_busy() {
        let slot = ResourceSlot::new("haptic actuator");
        let first = SyncEngine::new(PlaybackConfig::default(), stereo(), Recorder::default(), &slot).unwrap();
        let second = SyncEngine::new(PlaybackConfig::default(), stereo(), Recorder::default(), &slot);
        assert!(matches!(second, Err(Error::Busy(_))));
        drop(first);
        assert!(SyncEngine::new(PlaybackConfig::default(), stereo(), Recorder::default(), &slot).is_ok());
    }
}
