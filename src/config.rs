use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::audio::BeatProfile;
use crate::error::{Error, Result};
use crate::playback::DevicePosition;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub squeeze: SqueezeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u32,
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: i64,
    #[serde(default = "default_amplitude_threshold")]
    pub amplitude_threshold: f32,
    #[serde(default = "default_drum_threshold")]
    pub drum_threshold: f32,
    /// In the spectral analyzer's raw-sample magnitude units.
    #[serde(default = "default_bass_threshold")]
    pub bass_threshold: f64,
    #[serde(default = "default_bass_low_hz")]
    pub bass_low_hz: f64,
    #[serde(default = "default_bass_high_hz")]
    pub bass_high_hz: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Negative values fire haptics ahead of the audio.
    #[serde(default)]
    pub sync_offset_ms: i64,
    #[serde(default)]
    pub lead_in_ms: i64,
    #[serde(default)]
    pub lead_out_ms: i64,
    #[serde(default = "default_master_intensity")]
    pub master_intensity: f32,
    #[serde(default = "default_drift_tolerance_ms")]
    pub drift_tolerance_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqueezeConfig {
    #[serde(default = "default_tone_hz")]
    pub tone_hz: f64,
    #[serde(default = "default_tone_amplitude")]
    pub tone_amplitude: f32,
    /// Trigger when live magnitude falls below this percentage of baseline.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    #[serde(default = "default_calibration_ms")]
    pub calibration_ms: u64,
    #[serde(default = "default_dead_time_ms")]
    pub dead_time_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u32,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default = "default_position")]
    pub position: DevicePosition,
    #[serde(default = "default_profiles")]
    pub profiles: Vec<BeatProfile>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            refractory_ms: default_refractory_ms(),
            amplitude_threshold: default_amplitude_threshold(),
            drum_threshold: default_drum_threshold(),
            bass_threshold: default_bass_threshold(),
            bass_low_hz: default_bass_low_hz(),
            bass_high_hz: default_bass_high_hz(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            sync_offset_ms: 0,
            lead_in_ms: 0,
            lead_out_ms: 0,
            master_intensity: default_master_intensity(),
            drift_tolerance_ms: default_drift_tolerance_ms(),
        }
    }
}

impl Default for SqueezeConfig {
    fn default() -> Self {
        Self {
            tone_hz: default_tone_hz(),
            tone_amplitude: default_tone_amplitude(),
            threshold_percent: default_threshold_percent(),
            calibration_ms: default_calibration_ms(),
            dead_time_ms: default_dead_time_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            buffer_ms: default_buffer_ms(),
        }
    }
}

fn default_window_ms() -> u32 { 20 }
fn default_refractory_ms() -> i64 { 250 }
fn default_amplitude_threshold() -> f32 { 0.6 }
fn default_drum_threshold() -> f32 { 0.8 }
fn default_bass_threshold() -> f64 { 50.0 }
fn default_bass_low_hz() -> f64 { 20.0 }
fn default_bass_high_hz() -> f64 { 150.0 }
fn default_tick_hz() -> u32 { 50 }
fn default_master_intensity() -> f32 { 1.0 }
fn default_drift_tolerance_ms() -> i64 { 40 }
fn default_tone_hz() -> f64 { 20_000.0 }
fn default_tone_amplitude() -> f32 { 0.2 }
fn default_threshold_percent() -> f64 { 70.0 }
fn default_calibration_ms() -> u64 { 1000 }
fn default_dead_time_ms() -> u64 { 200 }
fn default_read_timeout_ms() -> u64 { 10 }
fn default_buffer_ms() -> u32 { 20 }
fn default_position() -> DevicePosition { DevicePosition::Center }
fn default_profiles() -> Vec<BeatProfile> { BeatProfile::ALL.to_vec() }

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Devices to drive; a left/right pair listening to every profile when
    /// none are configured.
    pub fn devices(&self) -> Vec<DeviceConfig> {
        if !self.devices.is_empty() {
            return self.devices.clone();
        }
        vec![
            DeviceConfig {
                id: "left".into(),
                position: DevicePosition::Left,
                profiles: default_profiles(),
            },
            DeviceConfig {
                id: "right".into(),
                position: DevicePosition::Right,
                profiles: default_profiles(),
            },
        ]
    }

    /// Timeline directory: explicit setting, else the platform data dir.
    pub fn timeline_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.store.dir {
            return dir.clone();
        }
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("haptibeat")
            .join("timelines")
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));

        let a = &self.analysis;
        if a.window_ms == 0 {
            return invalid("analysis.window_ms must be positive");
        }
        if a.refractory_ms < 0 {
            return invalid("analysis.refractory_ms must not be negative");
        }
        if !(0.0..=1.0).contains(&a.amplitude_threshold) || !(0.0..=1.0).contains(&a.drum_threshold) {
            return invalid("amplitude and drum thresholds must be within 0.0-1.0");
        }
        if a.bass_low_hz < 0.0 || a.bass_high_hz <= a.bass_low_hz {
            return invalid("analysis.bass_high_hz must exceed bass_low_hz");
        }

        let p = &self.playback;
        if p.tick_hz == 0 {
            return invalid("playback.tick_hz must be positive");
        }
        if !(0.0..=1.0).contains(&p.master_intensity) {
            return invalid("playback.master_intensity must be within 0.0-1.0");
        }
        if p.lead_in_ms < 0 || p.lead_out_ms < 0 || p.drift_tolerance_ms < 0 {
            return invalid("lead-in, lead-out and drift tolerance must not be negative");
        }

        let s = &self.squeeze;
        if s.calibration_ms == 0 || s.buffer_ms == 0 || s.read_timeout_ms == 0 {
            return invalid("squeeze calibration, buffer and timeout must be positive");
        }
        if s.threshold_percent <= 0.0 || s.threshold_percent >= 100.0 {
            return invalid("squeeze.threshold_percent must be between 0 and 100");
        }
        if s.tone_hz <= 0.0 {
            return invalid("squeeze.tone_hz must be positive");
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate device id '{}'", device.id)));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    Config::from_toml(&content)
}
