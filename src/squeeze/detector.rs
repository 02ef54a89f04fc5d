//! Threaded squeeze session: owns the probe hardware while running and feeds
//! probe readings to a [`SqueezeMonitor`].

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::hardware::ProbeHardware;
use super::monitor::{MonitorEvent, SqueezeMonitor};
use crate::audio::Spectrum;
use crate::config::SqueezeConfig;
use crate::error::{Error, Result};
use crate::resource::{Lease, ResourceSlot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqueezeState {
    Stopped,
    Calibrating,
    Detecting,
}

impl SqueezeState {
    fn name(self) -> &'static str {
        match self {
            SqueezeState::Stopped => "stopped",
            SqueezeState::Calibrating => "calibrating",
            SqueezeState::Detecting => "detecting",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SqueezeState::Calibrating,
            2 => SqueezeState::Detecting,
            _ => SqueezeState::Stopped,
        }
    }
}

/// Delivered from the worker thread with `try_send`; a full channel drops
/// the event rather than stall the read loop.
#[derive(Clone, Debug, PartialEq)]
pub enum SqueezeEvent {
    CalibrationComplete { baseline: f64 },
    Triggered { magnitude: f64, baseline: f64 },
    /// The session stopped itself and released the hardware.
    Failed(String),
}

/// State shared between the controller and the worker.
struct Shared {
    running: AtomicBool,
    recalibrate: AtomicBool,
    state: AtomicU8,
    lease: Mutex<Option<Lease>>,
}

impl Shared {
    fn set_state(&self, state: SqueezeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn drop_lease(&self) {
        if let Ok(mut lease) = self.lease.lock() {
            lease.take();
        }
    }
}

pub struct SqueezeDetector {
    config: SqueezeConfig,
    hardware: Arc<dyn ProbeHardware>,
    slot: ResourceSlot,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl SqueezeDetector {
    /// `slot` guards the audio hardware across sessions; pass the same slot to
    /// every detector that would use the same devices.
    pub fn new(config: SqueezeConfig, hardware: Arc<dyn ProbeHardware>, slot: ResourceSlot) -> Self {
        Self {
            config,
            hardware,
            slot,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                recalibrate: AtomicBool::new(false),
                state: AtomicU8::new(SqueezeState::Stopped as u8),
                lease: Mutex::new(None),
            }),
            worker: None,
        }
    }

    pub fn state(&self) -> SqueezeState {
        SqueezeState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() != SqueezeState::Stopped
    }

    /// Claim the audio hardware, start the probe tone and begin calibrating.
    ///
    /// On any failure the detector is left stopped with nothing held.
    pub fn start(&mut self, events: Sender<SqueezeEvent>) -> Result<()> {
        if self.is_running() {
            return Err(Error::InvalidState {
                operation: "start",
                state: self.state().name(),
            });
        }
        // Reap a session that stopped itself
        self.stop();

        let lease = self.slot.try_acquire()?;
        let sample_rate = match self.hardware.start(self.config.tone_hz, self.config.tone_amplitude) {
            Ok(rate) => rate,
            Err(e) => {
                self.hardware.stop_io();
                self.hardware.release();
                return Err(match e {
                    Error::HardwareUnavailable(_) => e,
                    other => Error::HardwareUnavailable(other.to_string()),
                });
            }
        };

        if let Ok(mut held) = self.shared.lease.lock() {
            *held = Some(lease);
        }
        self.shared.recalibrate.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        self.shared.set_state(SqueezeState::Calibrating);

        let worker = Worker {
            config: self.config.clone(),
            hardware: Arc::clone(&self.hardware),
            shared: Arc::clone(&self.shared),
            sample_rate,
            events,
        };
        match std::thread::Builder::new().name("squeeze".into()).spawn(move || worker.run()) {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.hardware.stop_io();
                self.hardware.release();
                self.shared.drop_lease();
                self.shared.set_state(SqueezeState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Measure a new baseline without restarting the hardware streams.
    pub fn recalibrate(&self) -> Result<()> {
        match self.state() {
            SqueezeState::Stopped => Err(Error::InvalidState {
                operation: "recalibrate",
                state: SqueezeState::Stopped.name(),
            }),
            _ => {
                self.shared.recalibrate.store(true, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Stop I/O, wait for the worker, then release the hardware and the slot.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::Release);
        self.hardware.stop_io();
        if worker.join().is_err() {
            log::error!("Squeeze worker panicked");
        }
        self.hardware.release();
        self.shared.drop_lease();
        self.shared.set_state(SqueezeState::Stopped);
        log::debug!("Squeeze detector stopped");
    }
}

impl Drop for SqueezeDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    config: SqueezeConfig,
    hardware: Arc<dyn ProbeHardware>,
    shared: Arc<Shared>,
    sample_rate: u32,
    events: Sender<SqueezeEvent>,
}

impl Worker {
    fn run(self) {
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;
        let timeout = Duration::from_millis(self.config.read_timeout_ms);
        let mut monitor = SqueezeMonitor::new(self.config.clone(), elapsed_ms());
        let mut spectrum = Spectrum::new();

        while self.shared.running.load(Ordering::Acquire) {
            if self.shared.recalibrate.swap(false, Ordering::AcqRel) {
                log::info!("Recalibrating squeeze baseline");
                monitor.recalibrate(elapsed_ms());
                self.shared.set_state(SqueezeState::Calibrating);
            }

            let reading = match self.hardware.read(timeout) {
                Ok(samples) => {
                    samples.map(|s| spectrum.magnitude_at_bin(&s, 1, self.sample_rate, self.config.tone_hz))
                }
                Err(e) => {
                    if self.shared.running.load(Ordering::Acquire) {
                        self.fail(e.to_string());
                    }
                    return;
                }
            };

            match monitor.update(reading, elapsed_ms()) {
                Some(MonitorEvent::Calibrated(calibration)) => {
                    self.shared.set_state(SqueezeState::Detecting);
                    self.send(SqueezeEvent::CalibrationComplete {
                        baseline: calibration.baseline_magnitude,
                    });
                }
                Some(MonitorEvent::Triggered { magnitude, baseline }) => {
                    log::info!("Squeeze detected: {:.2} against baseline {:.2}", magnitude, baseline);
                    self.send(SqueezeEvent::Triggered { magnitude, baseline });
                }
                Some(MonitorEvent::CalibrationFailed(reason)) => {
                    self.fail(reason);
                    return;
                }
                None => {}
            }
        }
    }

    /// Stop the session from inside: same teardown order as `stop`, minus the
    /// join on ourselves.
    fn fail(&self, reason: String) {
        log::error!("Squeeze detector failed: {}", reason);
        self.shared.running.store(false, Ordering::Release);
        self.hardware.stop_io();
        self.hardware.release();
        self.shared.drop_lease();
        self.shared.set_state(SqueezeState::Stopped);
        self.send(SqueezeEvent::Failed(reason));
    }

    fn send(&self, event: SqueezeEvent) {
        if self.events.try_send(event).is_err() {
            log::warn!("Squeeze event dropped, receiver full or gone");
        }
    }
}
