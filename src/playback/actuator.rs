use std::collections::HashMap;

/// Output side of playback: one vibration motor (or group) per device id.
///
/// Called once per device every tick, usually with an unchanged value; an
/// implementation must treat repeats as harmless.
pub trait HapticActuator: Send {
    fn set_intensity(&mut self, device_id: &str, intensity: f32);
}

/// Actuator that writes intensity changes to the log. Used by the CLI when no
/// hardware backend is attached.
#[derive(Debug, Default)]
pub struct LogActuator {
    last: HashMap<String, f32>,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HapticActuator for LogActuator {
    fn set_intensity(&mut self, device_id: &str, intensity: f32) {
        let previous = self.last.insert(device_id.to_string(), intensity);
        if previous.map_or(true, |p| (p - intensity).abs() > 0.01) {
            log::info!("{:>8}: {:<20} {:.2}", device_id, "#".repeat((intensity * 20.0) as usize), intensity);
        }
    }
}

impl<T: HapticActuator + ?Sized> HapticActuator for Box<T> {
    fn set_intensity(&mut self, device_id: &str, intensity: f32) {
        (**self).set_intensity(device_id, intensity)
    }
}
