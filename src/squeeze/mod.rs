//! Squeeze (deflection) detection from a probe tone played and recaptured
//! through the device casing.

pub mod detector;
pub mod hardware;
pub mod monitor;

pub use detector::{SqueezeDetector, SqueezeEvent, SqueezeState};
pub use hardware::{CpalProbe, ProbeHardware};
pub use monitor::{MonitorEvent, MonitorPhase, SqueezeCalibration, SqueezeMonitor};
