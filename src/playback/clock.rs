//! Player position tracking and the fixed-rate tick loop.

use std::time::{Duration, Instant};

use super::actuator::HapticActuator;
use super::engine::{PlaybackPhase, SyncEngine};
use crate::cancel::CancelToken;

/// Budget for one tick; haptics lag visibly beyond this.
const TICK_BUDGET: Duration = Duration::from_millis(5);

/// What the external media player last told us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayerStatus {
    pub position_ms: i64,
    pub playing: bool,
    pub finished: bool,
}

/// Source of player position reports. `poll` returns `None` when nothing new
/// has been reported since the previous call.
pub trait PlayerClock {
    fn poll(&mut self) -> Option<PlayerStatus>;
}

/// Extrapolates the player position between reports with a monotonic clock.
///
/// Reports that agree with the extrapolation within `tolerance_ms` are
/// absorbed so position advances smoothly; larger disagreements re-anchor.
#[derive(Debug)]
pub struct PositionTracker {
    anchor_ms: i64,
    anchor_at: Instant,
    playing: bool,
    tolerance_ms: i64,
}

impl PositionTracker {
    pub fn new(tolerance_ms: i64, now: Instant) -> Self {
        Self {
            anchor_ms: 0,
            anchor_at: now,
            playing: false,
            tolerance_ms,
        }
    }

    pub fn estimate(&self, now: Instant) -> i64 {
        if self.playing {
            self.anchor_ms + now.saturating_duration_since(self.anchor_at).as_millis() as i64
        } else {
            self.anchor_ms
        }
    }

    pub fn report(&mut self, position_ms: i64, playing: bool, now: Instant) {
        let estimate = self.estimate(now);
        let drift = position_ms - estimate;
        if playing != self.playing || drift.abs() > self.tolerance_ms {
            if playing == self.playing {
                log::debug!("Clock drift {}ms, re-anchoring at {}ms", drift, position_ms);
            }
            self.anchor(position_ms, now);
            self.playing = playing;
        }
    }

    pub fn seek(&mut self, position_ms: i64, now: Instant) {
        self.anchor(position_ms, now);
    }

    fn anchor(&mut self, position_ms: i64, now: Instant) {
        self.anchor_ms = position_ms;
        self.anchor_at = now;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub over_budget: u64,
    pub slowest: Duration,
}

/// Drive `engine` at its configured tick rate from `player` reports until the
/// player finishes or `cancel` fires. The engine is stopped on exit.
pub fn run_ticks<A: HapticActuator>(
    engine: &mut SyncEngine<A>,
    player: &mut dyn PlayerClock,
    cancel: &CancelToken,
) -> TickStats {
    let interval = Duration::from_secs_f64(1.0 / f64::from(engine.config().tick_hz.max(1)));
    let mut tracker = PositionTracker::new(engine.config().drift_tolerance_ms, Instant::now());
    let mut stats = TickStats::default();
    let mut next = Instant::now();

    while !cancel.is_cancelled() {
        let started = Instant::now();

        if let Some(status) = player.poll() {
            if status.finished {
                break;
            }
            tracker.report(status.position_ms, status.playing, started);
            let result = match (status.playing, engine.phase()) {
                (true, PlaybackPhase::Loaded | PlaybackPhase::Paused) => engine.play(),
                (false, PlaybackPhase::Playing) => engine.pause(),
                _ => Ok(()),
            };
            if let Err(e) = result {
                log::warn!("Player state change ignored: {}", e);
            }
        }

        engine.tick(tracker.estimate(started));

        let spent = started.elapsed();
        stats.ticks += 1;
        stats.slowest = stats.slowest.max(spent);
        if spent > TICK_BUDGET {
            stats.over_budget += 1;
            log::warn!("Tick took {:?}", spent);
        }

        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    if let Err(e) = engine.stop() {
        log::debug!("Stop after tick loop: {}", e);
    }
    stats
}

/// Stand-in player that advances in real time from `start_ms`, for driving
/// haptics without an attached media player.
pub struct WallClockPlayer {
    started: Instant,
    start_ms: i64,
    duration_ms: i64,
    announced: bool,
}

impl WallClockPlayer {
    pub fn new(start_ms: i64, duration_ms: i64) -> Self {
        Self {
            started: Instant::now(),
            start_ms,
            duration_ms,
            announced: false,
        }
    }
}

impl PlayerClock for WallClockPlayer {
    fn poll(&mut self) -> Option<PlayerStatus> {
        let position_ms = self.start_ms + self.started.elapsed().as_millis() as i64;
        if position_ms >= self.duration_ms {
            return Some(PlayerStatus {
                position_ms: self.duration_ms,
                playing: false,
                finished: true,
            });
        }
        if self.announced {
            return None;
        }
        self.announced = true;
        Some(PlayerStatus {
            position_ms,
            playing: true,
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BeatChannel, BeatProfile};
    use crate::config::PlaybackConfig;
    use crate::playback::engine::tests::{beat, engine, source, timeline};

    #[test]
    fn tracker_extrapolates_while_playing() {
        let t0 = Instant::now();
        let mut tracker = PositionTracker::new(40, t0);
        tracker.report(1000, true, t0);
        assert_eq!(tracker.estimate(t0 + Duration::from_millis(250)), 1250);

        tracker.report(1000, false, t0 + Duration::from_millis(300));
        assert_eq!(tracker.estimate(t0 + Duration::from_secs(5)), 1000);
    }

    #[test]
    fn small_drift_is_absorbed_large_drift_re_anchors() {
        let t0 = Instant::now();
        let mut tracker = PositionTracker::new(40, t0);
        tracker.report(0, true, t0);

        let t1 = t0 + Duration::from_millis(500);
        tracker.report(520, true, t1);
        assert_eq!(tracker.estimate(t1), 500);

        tracker.report(700, true, t1);
        assert_eq!(tracker.estimate(t1), 700);
    }

    #[test]
    fn seek_re_anchors_immediately() {
        let t0 = Instant::now();
        let mut tracker = PositionTracker::new(40, t0);
        tracker.report(0, true, t0);
        tracker.seek(60_000, t0 + Duration::from_millis(10));
        assert_eq!(tracker.estimate(t0 + Duration::from_millis(20)), 60_010);
    }

    struct Scripted(Vec<PlayerStatus>);

    impl PlayerClock for Scripted {
        fn poll(&mut self) -> Option<PlayerStatus> {
            if self.0.is_empty() {
                None
            } else {
                Some(self.0.remove(0))
            }
        }
    }

    #[test]
    fn tick_loop_follows_player_and_stops() {
        let config = PlaybackConfig {
            tick_hz: 1000,
            ..PlaybackConfig::default()
        };
        let (mut engine, recorder) = engine(config);
        engine
            .load(source(), vec![timeline(BeatProfile::Drum, vec![beat(5000, 10_000, 0.9, BeatChannel::Both)])])
            .unwrap();

        let status = |position_ms, playing, finished| PlayerStatus {
            position_ms,
            playing,
            finished,
        };
        let mut player = Scripted(vec![
            status(6000, true, false),
            status(6001, true, false),
            status(6002, false, false),
            status(6002, false, true),
        ]);

        let stats = run_ticks(&mut engine, &mut player, &CancelToken::new());
        assert_eq!(stats.ticks, 3);
        assert_eq!(engine.phase(), PlaybackPhase::Stopped);

        let calls = recorder.calls();
        assert!(calls.iter().any(|(id, level)| id == "left" && (*level - 0.9).abs() < 1e-6));
        assert_eq!(calls.last().unwrap().1, 0.0);
    }

    #[test]
    fn wall_clock_reports_once_then_finishes() {
        let mut player = WallClockPlayer::new(5000, 5000);
        let first = player.poll().unwrap();
        assert!(first.finished);

        let mut player = WallClockPlayer::new(1000, 60_000);
        let first = player.poll().unwrap();
        assert!(first.playing && !first.finished);
        assert!(first.position_ms >= 1000);
        assert_eq!(player.poll(), None);
    }

    #[test]
    fn cancelled_loop_does_not_tick() {
        let (mut engine, _) = engine(PlaybackConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let stats = run_ticks(&mut engine, &mut Scripted(vec![]), &cancel);
        assert_eq!(stats.ticks, 0);
    }
}
