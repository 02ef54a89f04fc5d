//! Probe tone output and loopback capture.
//!
//! cpal streams are not `Send`, so [`CpalProbe`] keeps them on a dedicated I/O
//! thread and hands captured buffers to readers over a channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};

/// Captured buffers queued ahead of the reader before new ones are dropped.
const CAPTURE_QUEUE: usize = 64;

/// Audio hardware used by one squeeze session.
///
/// `read` is called from the detector's worker while `stop_io` may be called
/// from another thread to unblock it. `stop_io` and `release` are idempotent.
pub trait ProbeHardware: Send + Sync {
    /// Begin emitting the tone and capturing. Returns the capture sample rate;
    /// captured buffers are mono.
    fn start(&self, tone_hz: f64, amplitude: f32) -> Result<u32>;

    /// Next captured buffer, `Ok(None)` on timeout.
    fn read(&self, timeout: Duration) -> Result<Option<Vec<i16>>>;

    /// Stop the streams so no call stays parked in I/O.
    fn stop_io(&self);

    /// Free device handles. Only valid after `stop_io`.
    fn release(&self);
}

struct IoThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Default output and input devices of the default cpal host.
pub struct CpalProbe {
    buffer_ms: u32,
    io: Mutex<Option<IoThread>>,
    capture: Mutex<Option<Receiver<Vec<i16>>>>,
}

impl CpalProbe {
    pub fn new(buffer_ms: u32) -> Self {
        Self {
            buffer_ms,
            io: Mutex::new(None),
            capture: Mutex::new(None),
        }
    }
}

impl ProbeHardware for CpalProbe {
    fn start(&self, tone_hz: f64, amplitude: f32) -> Result<u32> {
        let mut io = self.io.lock().map_err(|_| unavailable("probe state poisoned"))?;
        if io.is_some() {
            return Err(unavailable("probe already started"));
        }

        let (samples_tx, samples_rx) = bounded(CAPTURE_QUEUE);
        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let buffer_ms = self.buffer_ms;

        let handle = std::thread::Builder::new()
            .name("squeeze-io".into())
            .spawn(move || {
                let streams = match open_streams(tone_hz, amplitude, buffer_ms, samples_tx) {
                    Ok((output, input, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        (output, input)
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until stop_io or the probe is dropped
                let _ = stop_rx.recv();
                drop(streams);
            })?;

        let rate = match ready_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(unavailable("audio I/O thread exited during startup")),
        };
        match rate {
            Ok(rate) => {
                *io = Some(IoThread { stop: stop_tx, handle });
                if let Ok(mut capture) = self.capture.lock() {
                    *capture = Some(samples_rx);
                }
                log::info!("Probe tone {:.0} Hz started, capturing at {} Hz", tone_hz, rate);
                Ok(rate)
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn read(&self, timeout: Duration) -> Result<Option<Vec<i16>>> {
        let capture = self.capture.lock().map_err(|_| unavailable("capture state poisoned"))?;
        let Some(rx) = capture.as_ref() else {
            return Err(unavailable("capture not started"));
        };
        match rx.recv_timeout(timeout) {
            Ok(samples) => Ok(Some(samples)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(unavailable("capture stream closed")),
        }
    }

    fn stop_io(&self) {
        if let Ok(io) = self.io.lock() {
            if let Some(io) = io.as_ref() {
                let _ = io.stop.try_send(());
            }
        }
    }

    fn release(&self) {
        let io = self.io.lock().ok().and_then(|mut io| io.take());
        if let Some(io) = io {
            let _ = io.stop.try_send(());
            if io.handle.join().is_err() {
                log::warn!("Audio I/O thread panicked");
            }
            log::debug!("Probe hardware released");
        }
        if let Ok(mut capture) = self.capture.lock() {
            capture.take();
        }
    }
}

impl Drop for CpalProbe {
    fn drop(&mut self) {
        self.stop_io();
        self.release();
    }
}

fn unavailable(reason: impl Into<String>) -> Error {
    Error::HardwareUnavailable(reason.into())
}

fn open_streams(
    tone_hz: f64,
    amplitude: f32,
    buffer_ms: u32,
    samples: Sender<Vec<i16>>,
) -> Result<(cpal::Stream, cpal::Stream, u32)> {
    let host = cpal::default_host();
    let output_device = host
        .default_output_device()
        .ok_or_else(|| unavailable("no default output device"))?;
    let input_device = host
        .default_input_device()
        .ok_or_else(|| unavailable("no default input device"))?;

    let output_config = output_device.default_output_config().map_err(unavailable_from)?;
    let input_config = input_device.default_input_config().map_err(unavailable_from)?;
    let rate = input_config.sample_rate().0;

    let output = match output_config.sample_format() {
        cpal::SampleFormat::F32 => build_tone::<f32>(&output_device, &output_config.config(), tone_hz, amplitude),
        cpal::SampleFormat::I16 => build_tone::<i16>(&output_device, &output_config.config(), tone_hz, amplitude),
        cpal::SampleFormat::U16 => build_tone::<u16>(&output_device, &output_config.config(), tone_hz, amplitude),
        other => return Err(unavailable(format!("unsupported output format {:?}", other))),
    }
    .map_err(unavailable_from)?;

    let frames = (rate as usize * buffer_ms as usize / 1000).max(1);
    let input = match input_config.sample_format() {
        cpal::SampleFormat::F32 => build_capture::<f32>(&input_device, &input_config.config(), frames, samples),
        cpal::SampleFormat::I16 => build_capture::<i16>(&input_device, &input_config.config(), frames, samples),
        cpal::SampleFormat::U16 => build_capture::<u16>(&input_device, &input_config.config(), frames, samples),
        other => return Err(unavailable(format!("unsupported input format {:?}", other))),
    }
    .map_err(unavailable_from)?;

    output.play().map_err(unavailable_from)?;
    input.play().map_err(unavailable_from)?;
    Ok((output, input, rate))
}

fn unavailable_from(e: impl std::fmt::Display) -> Error {
    unavailable(e.to_string())
}

fn build_tone<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tone_hz: f64,
    amplitude: f32,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let step = std::f64::consts::TAU * tone_hz / f64::from(config.sample_rate.0);
    let mut phase = 0.0f64;

    device.build_output_stream(
        config,
        move |out: &mut [T], _| {
            for frame in out.chunks_mut(channels) {
                let value = T::from_sample((phase.sin() as f32) * amplitude);
                frame.iter_mut().for_each(|s| *s = value);
                phase = (phase + step) % std::f64::consts::TAU;
            }
        },
        |e| log::error!("Probe output stream error: {}", e),
        None,
    )
}

/// Captures the first channel, forwarding buffers of `frames` samples.
fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: usize,
    samples: Sender<Vec<i16>>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    let mut pending: Vec<i16> = Vec::with_capacity(frames);

    device.build_input_stream(
        config,
        move |data: &[T], _| {
            for frame in data.chunks(channels) {
                pending.push(<i16 as cpal::Sample>::from_sample(frame[0]));
                if pending.len() >= frames {
                    let buffer = std::mem::replace(&mut pending, Vec::with_capacity(frames));
                    if samples.try_send(buffer).is_err() {
                        log::trace!("Capture queue full, dropping buffer");
                    }
                }
            }
        },
        |e| log::error!("Loopback input stream error: {}", e),
        None,
    )
}
