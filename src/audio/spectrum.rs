//! FFT magnitude queries shared by bass beat detection and the squeeze probe.
//!
//! Inputs are interleaved 16-bit PCM in raw sample units. Multi-channel input is
//! averaged to mono, zero-padded to the next power of two `n`, transformed, and
//! bin magnitudes are divided by `n`.

use rustfft::{num_complex::Complex, FftPlanner};

/// Reusable FFT state. Plans are cached per length by the planner, so one
/// `Spectrum` per analysis pass or capture loop keeps planning off the hot path.
pub struct Spectrum {
    planner: FftPlanner<f64>,
    buffer: Vec<Complex<f64>>,
}

impl Default for Spectrum {
    fn default() -> Self {
        Self::new()
    }
}

impl Spectrum {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            buffer: Vec::new(),
        }
    }

    /// Sum of bin magnitudes whose frequency lies in `[low_hz, high_hz]`.
    pub fn magnitude_in_band(
        &mut self,
        samples: &[i16],
        channels: u16,
        sample_rate: u32,
        low_hz: f64,
        high_hz: f64,
    ) -> f64 {
        let Some(n) = self.transform(samples, channels) else {
            return 0.0;
        };
        let bin_hz = sample_rate as f64 / n as f64;
        let norm = 1.0 / n as f64;

        self.buffer[..=n / 2]
            .iter()
            .enumerate()
            .filter(|(bin, _)| {
                let freq = *bin as f64 * bin_hz;
                freq >= low_hz && freq <= high_hz
            })
            .map(|(_, c)| c.norm() * norm)
            .sum()
    }

    /// Magnitude of the single bin nearest to `target_hz`.
    pub fn magnitude_at_bin(&mut self, samples: &[i16], channels: u16, sample_rate: u32, target_hz: f64) -> f64 {
        let Some(n) = self.transform(samples, channels) else {
            return 0.0;
        };
        let bin = (target_hz * n as f64 / sample_rate as f64).round() as usize;
        if bin > n / 2 {
            return 0.0;
        }
        self.buffer[bin].norm() / n as f64
    }

    /// Load the mono mix into the buffer, zero-padded, and transform it in
    /// place. Returns the FFT length, or `None` for empty input.
    fn transform(&mut self, samples: &[i16], channels: u16) -> Option<usize> {
        let mono = downmix(samples, channels);
        if mono.is_empty() {
            return None;
        }

        let n = mono.len().next_power_of_two().max(2);
        self.buffer.clear();
        self.buffer.extend(mono.iter().map(|&s| Complex::new(s, 0.0)));
        self.buffer.resize(n, Complex::new(0.0, 0.0));

        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut self.buffer);
        Some(n)
    }
}

fn downmix(samples: &[i16], channels: u16) -> Vec<f64> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.iter().map(|&s| f64::from(s)).collect();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| f64::from(s)).sum::<f64>() / channels as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: u32, len: usize, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn low_tone_lands_in_bass_band() {
        let mut spectrum = Spectrum::new();
        for len in [882, 2048, 4410, 10_000] {
            let tone = sine(100.0, 44_100, len, 16_000.0);
            let bass = spectrum.magnitude_in_band(&tone, 1, 44_100, 20.0, 150.0);
            let above = spectrum.magnitude_in_band(&tone, 1, 44_100, 151.0, 300.0);
            assert!(bass > above, "len {}: {} <= {}", len, bass, above);
        }
    }

    #[test]
    fn bin_magnitude_is_normalized_by_fft_length() {
        // 100 Hz at 6400 Hz lands exactly on bin n/64; a full-bin sine reads A/2
        // whatever the length.
        let mut spectrum = Spectrum::new();
        for len in [256, 512, 1024] {
            let tone = sine(100.0, 6400, len, 1000.0);
            let at_tone = spectrum.magnitude_at_bin(&tone, 1, 6400, 100.0);
            assert!((at_tone - 500.0).abs() < 2.0, "len {}: {}", len, at_tone);
        }
    }

    #[test]
    fn single_bin_peaks_at_tone() {
        let mut spectrum = Spectrum::new();
        let tone = sine(100.0, 44_100, 4410, 16_000.0);
        let at_tone = spectrum.magnitude_at_bin(&tone, 1, 44_100, 100.0);
        let far = spectrum.magnitude_at_bin(&tone, 1, 44_100, 5000.0);
        assert!(at_tone >= far * 10.0, "{} vs {}", at_tone, far);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut spectrum = Spectrum::new();
        let mono = sine(1000.0, 48_000, 1024, 10_000.0);
        let stereo: Vec<i16> = mono.iter().flat_map(|&s| [s, s]).collect();
        let a = spectrum.magnitude_at_bin(&mono, 1, 48_000, 1000.0);
        let b = spectrum.magnitude_at_bin(&stereo, 2, 48_000, 1000.0);
        assert!((a - b).abs() < 1e-9);

        let cancel: Vec<i16> = mono.iter().flat_map(|&s| [s, s.saturating_neg()]).collect();
        assert!(spectrum.magnitude_at_bin(&cancel, 2, 48_000, 1000.0) < 1.0);
    }

    #[test]
    fn empty_input_is_silent() {
        let mut spectrum = Spectrum::new();
        assert_eq!(spectrum.magnitude_in_band(&[], 1, 44_100, 20.0, 150.0), 0.0);
        assert_eq!(spectrum.magnitude_at_bin(&[], 2, 44_100, 100.0), 0.0);
    }

    #[test]
    fn squeeze_tone_visible_near_nyquist() {
        let mut spectrum = Spectrum::new();
        let tone = sine(20_000.0, 48_000, 960, 8_000.0);
        let tone_bin = spectrum.magnitude_at_bin(&tone, 1, 48_000, 20_000.0);
        let off = spectrum.magnitude_at_bin(&tone, 1, 48_000, 5_000.0);
        assert!(tone_bin > off * 10.0);
    }
}
