use serde::{Deserialize, Serialize};

use crate::audio::{BeatChannel, BeatProfile};
use crate::config::DeviceConfig;

/// Where a haptic device sits, for panning Left/Right beats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Left,
    Right,
    Center,
}

impl DevicePosition {
    /// Whether a beat on `channel` reaches a device at this position.
    pub fn hears(self, channel: BeatChannel) -> bool {
        match (self, channel) {
            (_, BeatChannel::Both) | (DevicePosition::Center, _) => true,
            (DevicePosition::Left, BeatChannel::Left) | (DevicePosition::Right, BeatChannel::Right) => true,
            (DevicePosition::Left, BeatChannel::Right) | (DevicePosition::Right, BeatChannel::Left) => false,
        }
    }
}

/// Which physical devices respond to which profiles.
#[derive(Clone, Debug)]
pub struct DeviceAssignment {
    devices: Vec<DeviceConfig>,
}

impl DeviceAssignment {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Indices of devices a beat from `profile` on `channel` should drive.
    pub fn targets(&self, profile: BeatProfile, channel: BeatChannel) -> impl Iterator<Item = usize> + '_ {
        self.devices
            .iter()
            .enumerate()
            .filter(move |(_, d)| d.profiles.contains(&profile) && d.position.hears(channel))
            .map(|(i, _)| i)
    }

    pub fn listens_to(&self, profile: BeatProfile) -> bool {
        self.devices.iter().any(|d| d.profiles.contains(&profile))
    }
}
