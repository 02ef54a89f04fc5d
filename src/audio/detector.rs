//! Beat detection engine: streams PCM windows through a profile evaluator and
//! keeps only beats that clear the refractory period.

use super::beat::{BeatProfile, DetectedBeat};
use super::source::{OpenSource, PcmSource, SourceIdentity, SourceProvider};
use super::spectrum::Spectrum;
use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::error::Result;

/// How an analysis run ended. All three carry valid beats.
#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisOutcome {
    Completed,
    Cancelled,
    /// The decoder failed mid-stream; beats up to that point are kept.
    Interrupted(String),
}

#[derive(Clone, Debug)]
pub struct Analysis {
    pub beats: Vec<DetectedBeat>,
    pub outcome: AnalysisOutcome,
    pub windows: usize,
}

impl Analysis {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == AnalysisOutcome::Cancelled
    }
}

/// Drops any beat closer than `period_ms` to the last admitted one.
#[derive(Debug)]
struct RefractoryGate {
    period_ms: i64,
    last_ms: Option<i64>,
}

impl RefractoryGate {
    fn new(period_ms: i64) -> Self {
        Self {
            period_ms,
            last_ms: None,
        }
    }

    fn admit(&mut self, timestamp_ms: i64) -> bool {
        if let Some(last) = self.last_ms {
            if timestamp_ms <= last || timestamp_ms - last < self.period_ms {
                return false;
            }
        }
        self.last_ms = Some(timestamp_ms);
        true
    }
}

/// Clamped, non-decreasing progress fraction.
#[derive(Debug)]
struct Progress {
    total_ms: i64,
    last: f32,
}

impl Progress {
    fn advance(&mut self, position_ms: i64) -> f32 {
        if self.total_ms > 0 {
            let fraction = (position_ms as f64 / self.total_ms as f64).clamp(0.0, 1.0) as f32;
            self.last = self.last.max(fraction);
        }
        self.last
    }
}

pub struct BeatDetector {
    config: AnalysisConfig,
}

impl BeatDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Open `identity`, analyze it, and close it again on every exit path.
    ///
    /// Open failures (`SourceUnavailable`, `NoAudioTrack`) are returned as
    /// errors; anything that goes wrong after the first window is folded into
    /// an `Interrupted` outcome.
    pub fn analyze_source(
        &self,
        provider: &dyn SourceProvider,
        identity: &SourceIdentity,
        profile: BeatProfile,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<Analysis> {
        let mut open = OpenSource::open(provider, identity, self.config.window_ms)?;
        let analysis = self.analyze(open.source(), profile, cancel, on_progress);
        log::info!(
            "{} [{}]: {} beats from {} windows ({:?})",
            identity.file_name,
            profile,
            analysis.beats.len(),
            analysis.windows,
            analysis.outcome
        );
        Ok(analysis)
    }

    /// Run `profile` over every window of `source`.
    ///
    /// `on_progress` is called after each window with a fraction in 0.0-1.0; it
    /// runs on the analysis thread and must not block.
    pub fn analyze(
        &self,
        source: &mut dyn PcmSource,
        profile: BeatProfile,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(f32),
    ) -> Analysis {
        let info = source.info();
        let mut gate = RefractoryGate::new(self.config.refractory_ms);
        let mut progress = Progress {
            total_ms: info.duration_ms,
            last: 0.0,
        };
        let mut spectrum = Spectrum::new();
        let mut beats = Vec::new();
        let mut windows = 0usize;

        let outcome = loop {
            if cancel.is_cancelled() {
                break AnalysisOutcome::Cancelled;
            }

            let window = match source.next_window() {
                Ok(Some(window)) => window,
                Ok(None) => break AnalysisOutcome::Completed,
                Err(e) => {
                    log::warn!(
                        "Decoding stopped after {} windows, keeping {} beats: {}",
                        windows,
                        beats.len(),
                        e
                    );
                    break AnalysisOutcome::Interrupted(e.to_string());
                }
            };
            windows += 1;

            let candidate = profile.evaluate(
                &mut spectrum,
                &window.samples,
                info.channels,
                info.sample_rate,
                &self.config,
            );
            if let Some(candidate) = candidate {
                if gate.admit(window.presentation_ms) {
                    beats.push(candidate.at(window.presentation_ms));
                }
            }

            on_progress(progress.advance(window.presentation_ms));
        };

        if outcome == AnalysisOutcome::Completed {
            on_progress(1.0);
        }

        Analysis {
            beats,
            outcome,
            windows,
        }
    }
}
