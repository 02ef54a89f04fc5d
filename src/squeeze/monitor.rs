//! Calibration and trigger logic of the squeeze detector, free of threads and
//! hardware. Time is passed in explicitly as milliseconds since session start.

use crate::config::SqueezeConfig;

/// Baseline measured by the last calibration pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SqueezeCalibration {
    pub baseline_magnitude: f64,
    pub threshold_percent: f64,
}

impl SqueezeCalibration {
    /// Live magnitude below which a squeeze is reported.
    pub fn trigger_level(&self) -> f64 {
        self.baseline_magnitude * self.threshold_percent / 100.0
    }

    /// A zero baseline never triggers, whatever the live reading.
    pub fn is_triggered_by(&self, magnitude: f64) -> bool {
        self.baseline_magnitude > 0.0 && magnitude < self.trigger_level()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEvent {
    Calibrated(SqueezeCalibration),
    Triggered { magnitude: f64, baseline: f64 },
    CalibrationFailed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorPhase {
    Calibrating,
    Detecting,
    Failed,
}

#[derive(Debug)]
enum Phase {
    Calibrating { started_ms: u64, sum: f64, count: u32 },
    Detecting { hold_until_ms: u64 },
    Failed,
}

#[derive(Debug)]
pub struct SqueezeMonitor {
    config: SqueezeConfig,
    phase: Phase,
    calibration: Option<SqueezeCalibration>,
}

impl SqueezeMonitor {
    /// Starts in calibration at `now_ms`.
    pub fn new(config: SqueezeConfig, now_ms: u64) -> Self {
        Self {
            config,
            phase: Phase::Calibrating {
                started_ms: now_ms,
                sum: 0.0,
                count: 0,
            },
            calibration: None,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        match self.phase {
            Phase::Calibrating { .. } => MonitorPhase::Calibrating,
            Phase::Detecting { .. } => MonitorPhase::Detecting,
            Phase::Failed => MonitorPhase::Failed,
        }
    }

    pub fn calibration(&self) -> Option<SqueezeCalibration> {
        self.calibration
    }

    /// Measure a new baseline. No triggers fire until calibration completes.
    pub fn recalibrate(&mut self, now_ms: u64) {
        self.phase = Phase::Calibrating {
            started_ms: now_ms,
            sum: 0.0,
            count: 0,
        };
    }

    /// Feed one probe reading, or `None` when a read timed out. Timeouts still
    /// advance the calibration deadline.
    pub fn update(&mut self, reading: Option<f64>, now_ms: u64) -> Option<MonitorEvent> {
        match &mut self.phase {
            Phase::Calibrating { started_ms, sum, count } => {
                if let Some(magnitude) = reading {
                    *sum += magnitude;
                    *count += 1;
                }
                if now_ms.saturating_sub(*started_ms) < self.config.calibration_ms {
                    return None;
                }
                let (sum, count) = (*sum, *count);
                Some(self.finish_calibration(sum, count, now_ms))
            }
            Phase::Detecting { hold_until_ms } => {
                let magnitude = reading?;
                let calibration = self.calibration?;
                if now_ms < *hold_until_ms || !calibration.is_triggered_by(magnitude) {
                    return None;
                }
                *hold_until_ms = now_ms + self.config.dead_time_ms;
                Some(MonitorEvent::Triggered {
                    magnitude,
                    baseline: calibration.baseline_magnitude,
                })
            }
            Phase::Failed => None,
        }
    }

    fn finish_calibration(&mut self, sum: f64, count: u32, now_ms: u64) -> MonitorEvent {
        if count == 0 {
            self.phase = Phase::Failed;
            return MonitorEvent::CalibrationFailed("no probe readings during calibration".to_string());
        }

        let baseline = sum / f64::from(count);
        if baseline <= 0.0 {
            self.phase = Phase::Failed;
            return MonitorEvent::CalibrationFailed(format!("probe tone not detected ({} readings)", count));
        }

        let calibration = SqueezeCalibration {
            baseline_magnitude: baseline,
            threshold_percent: self.config.threshold_percent,
        };
        log::info!(
            "Squeeze baseline {:.2} from {} readings, trigger below {:.2}",
            baseline,
            count,
            calibration.trigger_level()
        );
        self.calibration = Some(calibration);
        self.phase = Phase::Detecting { hold_until_ms: now_ms };
        MonitorEvent::Calibrated(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SqueezeConfig {
        SqueezeConfig {
            calibration_ms: 100,
            dead_time_ms: 200,
            threshold_percent: 70.0,
            ..SqueezeConfig::default()
        }
    }

    fn calibrated(baseline: f64) -> SqueezeMonitor {
        let mut monitor = SqueezeMonitor::new(config(), 0);
        assert_eq!(monitor.update(Some(baseline), 50), None);
        assert!(matches!(monitor.update(Some(baseline), 100), Some(MonitorEvent::Calibrated(_))));
        monitor
    }

    #[test]
    fn baseline_is_the_mean_of_calibration_readings() {
        let mut monitor = SqueezeMonitor::new(config(), 1000);
        for (i, reading) in [8.0, 12.0, 10.0].into_iter().enumerate() {
            assert_eq!(monitor.update(Some(reading), 1000 + i as u64 * 20), None);
        }
        assert_eq!(monitor.update(None, 1090), None);
        assert_eq!(monitor.phase(), MonitorPhase::Calibrating);

        let event = monitor.update(None, 1100).unwrap();
        let expected = SqueezeCalibration {
            baseline_magnitude: 10.0,
            threshold_percent: 70.0,
        };
        assert_eq!(event, MonitorEvent::Calibrated(expected));
        assert_eq!(monitor.phase(), MonitorPhase::Detecting);
        assert!((expected.trigger_level() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn trigger_then_dead_time() {
        let mut monitor = calibrated(10.0);

        assert_eq!(monitor.update(Some(7.5), 150), None);
        assert_eq!(
            monitor.update(Some(6.0), 200),
            Some(MonitorEvent::Triggered {
                magnitude: 6.0,
                baseline: 10.0
            })
        );
        assert_eq!(monitor.update(Some(1.0), 250), None);
        assert_eq!(monitor.update(Some(1.0), 399), None);
        assert!(monitor.update(Some(1.0), 400).is_some());
        assert_eq!(monitor.update(None, 1000), None);
    }

    #[test]
    fn zero_baseline_fails_and_never_triggers() {
        let mut monitor = SqueezeMonitor::new(config(), 0);
        monitor.update(Some(0.0), 10);
        let event = monitor.update(Some(0.0), 100).unwrap();
        assert!(matches!(event, MonitorEvent::CalibrationFailed(_)));
        assert_eq!(monitor.phase(), MonitorPhase::Failed);
        assert_eq!(monitor.calibration(), None);

        for t in 100..200 {
            assert_eq!(monitor.update(Some(0.0), t), None);
        }

        let zero = SqueezeCalibration {
            baseline_magnitude: 0.0,
            threshold_percent: 70.0,
        };
        assert!(!zero.is_triggered_by(-1.0));
    }

    #[test]
    fn no_readings_fails_calibration() {
        let mut monitor = SqueezeMonitor::new(config(), 0);
        assert_eq!(monitor.update(None, 60), None);
        assert!(matches!(monitor.update(None, 120), Some(MonitorEvent::CalibrationFailed(_))));
    }

    #[test]
    fn recalibrate_suspends_triggers() {
        let mut monitor = calibrated(10.0);
        monitor.recalibrate(500);
        assert_eq!(monitor.phase(), MonitorPhase::Calibrating);
        assert_eq!(monitor.update(Some(2.0), 550), None);

        let event = monitor.update(Some(2.0), 600).unwrap();
        assert!(matches!(event, MonitorEvent::Calibrated(c) if (c.baseline_magnitude - 2.0).abs() < 1e-9));
        assert_eq!(monitor.update(Some(1.0), 610).map(|_| ()), Some(()));
    }
}
