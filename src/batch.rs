//! Runs the beat detector over many (file, profile) pairs, one at a time, and
//! persists each result.

use crossbeam_channel::{bounded, unbounded, Receiver};
use std::sync::Arc;

use crate::audio::{BeatDetector, BeatProfile, SourceIdentity, SourceProvider};
use crate::cancel::CancelToken;
use crate::timeline::{BeatTimeline, TimelineKey, TimelineStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchJob {
    pub identity: SourceIdentity,
    pub profile: BeatProfile,
}

impl BatchJob {
    pub fn new(identity: SourceIdentity, profile: BeatProfile) -> Self {
        Self { identity, profile }
    }

    /// Every profile for every file, file-major.
    pub fn cross(identities: &[SourceIdentity], profiles: &[BeatProfile]) -> Vec<Self> {
        identities
            .iter()
            .flat_map(|id| profiles.iter().map(move |&p| Self::new(id.clone(), p)))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BatchOptions {
    /// Re-analyze pairs that already have a stored timeline.
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchProgress {
    pub pairs_completed: usize,
    pub pairs_total: usize,
    /// Progress within the pair being analyzed, 0.0-1.0.
    pub current_file_progress: f32,
}

impl BatchProgress {
    pub fn overall(&self) -> f32 {
        if self.pairs_total == 0 {
            return 1.0;
        }
        ((self.pairs_completed as f32 + self.current_file_progress) / self.pairs_total as f32).min(1.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub analyzed: usize,
    pub skipped: usize,
    /// Pairs whose source could not be analyzed; logged and counted only.
    pub failed: usize,
    /// Analyzed pairs that produced no beats and so wrote nothing.
    pub empty: usize,
    pub cancelled: bool,
}

pub struct BatchOrchestrator {
    provider: Arc<dyn SourceProvider>,
    store: TimelineStore,
    detector: BeatDetector,
}

impl BatchOrchestrator {
    pub fn new(provider: Arc<dyn SourceProvider>, store: TimelineStore, detector: BeatDetector) -> Self {
        Self {
            provider,
            store,
            detector,
        }
    }

    pub fn store(&self) -> &TimelineStore {
        &self.store
    }

    /// Analyze `jobs` in order on the calling thread.
    ///
    /// Cancellation aborts the pair in flight and skips the rest; a cancelled
    /// pair is never persisted.
    pub fn run(
        &self,
        jobs: &[BatchJob],
        options: BatchOptions,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(BatchProgress),
    ) -> BatchReport {
        let total = jobs.len();
        let mut report = BatchReport::default();
        log::info!("Batch of {} pairs starting", total);

        for (index, job) in jobs.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let progress = |current_file_progress| BatchProgress {
                pairs_completed: index,
                pairs_total: total,
                current_file_progress,
            };
            on_progress(progress(0.0));

            if !options.force && self.store.exists(&job.identity, job.profile) {
                log::info!("Skipping {} [{}], timeline exists", job.identity, job.profile);
                report.skipped += 1;
                continue;
            }

            let analysis = match self.detector.analyze_source(
                self.provider.as_ref(),
                &job.identity,
                job.profile,
                cancel,
                &mut |p| on_progress(progress(p)),
            ) {
                Ok(analysis) => analysis,
                Err(e) => {
                    log::warn!("Analysis of {} [{}] failed: {}", job.identity, job.profile, e);
                    report.failed += 1;
                    continue;
                }
            };

            if analysis.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.analyzed += 1;
            if analysis.beats.is_empty() {
                log::info!("No {} beats in {}, nothing saved", job.profile, job.identity);
                report.empty += 1;
                continue;
            }

            let timeline = BeatTimeline::new(TimelineKey::new(job.identity.clone(), job.profile), analysis.beats);
            if let Err(e) = self.store.save(&timeline) {
                log::warn!("Could not save timeline for {} [{}]: {}", job.identity, job.profile, e);
                report.failed += 1;
            }
        }

        if !report.cancelled {
            on_progress(BatchProgress {
                pairs_completed: total,
                pairs_total: total,
                current_file_progress: 0.0,
            });
        }
        log::info!(
            "Batch finished: {} analyzed, {} skipped, {} failed, {} empty{}",
            report.analyzed,
            report.skipped,
            report.failed,
            report.empty,
            if report.cancelled { ", cancelled" } else { "" }
        );
        report
    }

    /// Run the batch on the rayon pool and return a handle to observe or
    /// cancel it.
    pub fn start(self: Arc<Self>, jobs: Vec<BatchJob>, options: BatchOptions) -> BatchSession {
        let cancel = CancelToken::new();
        let (progress_tx, progress_rx) = unbounded();
        let (done_tx, done_rx) = bounded(1);

        let token = cancel.clone();
        rayon::spawn(move || {
            let report = self.run(&jobs, options, &token, &mut |p| {
                let _ = progress_tx.send(p);
            });
            let _ = done_tx.send(report);
        });

        BatchSession {
            cancel,
            progress: progress_rx,
            done: done_rx,
        }
    }
}

/// Handle to a batch running in the background.
pub struct BatchSession {
    cancel: CancelToken,
    progress: Receiver<BatchProgress>,
    done: Receiver<BatchReport>,
}

impl BatchSession {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> &Receiver<BatchProgress> {
        &self.progress
    }

    /// Block until the batch ends. A worker that died without reporting
    /// counts as cancelled.
    pub fn wait(self) -> BatchReport {
        self.done.recv().unwrap_or(BatchReport {
            cancelled: true,
            ..BatchReport::default()
        })
    }
}
