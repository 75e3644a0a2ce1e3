//! Drift monitor
//!
//! While both legs play, sample their clocks on a fixed period. A sample
//! whose divergence exceeds the threshold counts as drifted; after enough
//! consecutive drifted samples the lagging leg is seeked to the leading
//! leg's position. One noisy sample never triggers a seek.
//!
//! The monitor is Idle until armed and returns to Idle when disarmed. Each
//! arming gets a fresh epoch; a tick carrying a stale epoch is ignored, so a
//! tick that races a disarm cannot act after it.

use std::sync::Arc;
use std::time::Duration;

use tandem_common::config::SyncConfig;
use tandem_common::time::diff_ms;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::LegSlot;
use crate::leg::Leg;

/// Seek the lagging leg to the leading leg's position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub lagging: LegSlot,
    pub target_ms: u64,
}

/// Consecutive-sample divergence counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftDetector {
    threshold_ms: u64,
    confirmations: u32,
    divergent_samples: u32,
}

impl DriftDetector {
    pub fn new(threshold_ms: u64, confirmations: u32) -> Self {
        Self {
            threshold_ms,
            confirmations: confirmations.max(1),
            divergent_samples: 0,
        }
    }

    pub fn divergent_samples(&self) -> u32 {
        self.divergent_samples
    }

    pub fn reset(&mut self) {
        self.divergent_samples = 0;
    }

    /// Record one periodic sample of both leg clocks
    pub fn sample(
        &mut self,
        composite_playing: bool,
        row_time: u64,
        col_time: u64,
    ) -> Option<Correction> {
        if !composite_playing {
            self.reset();
            return None;
        }

        let diff = diff_ms(row_time, col_time);
        if diff.unsigned_abs() > self.threshold_ms {
            self.divergent_samples += 1;
        } else {
            self.divergent_samples = 0;
        }

        if self.divergent_samples < self.confirmations {
            return None;
        }

        self.reset();
        let correction = if diff < 0 {
            Correction {
                lagging: LegSlot::Row,
                target_ms: col_time,
            }
        } else {
            Correction {
                lagging: LegSlot::Col,
                target_ms: row_time,
            }
        };
        Some(correction)
    }
}

struct Armed {
    epoch: u64,
    task: JoinHandle<()>,
}

/// Idle/Armed state machine owning the sampling task
pub struct DriftMonitor {
    detector: DriftDetector,
    period: Duration,
    armed: Option<Armed>,
    next_epoch: u64,
}

impl DriftMonitor {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            detector: DriftDetector::new(config.drift_threshold_ms, config.drift_confirmations),
            period: config.drift_check_interval(),
            armed: None,
            next_epoch: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Whether a tick from the arming identified by `epoch` may still act
    pub fn is_current(&self, epoch: u64) -> bool {
        matches!(&self.armed, Some(armed) if armed.epoch == epoch)
    }

    pub fn divergent_samples(&self) -> u32 {
        self.detector.divergent_samples()
    }

    /// Idle → Armed. `spawn` receives the new epoch and starts the sampler.
    ///
    /// Returns false (and does not call `spawn`) when already armed.
    pub fn arm(&mut self, spawn: impl FnOnce(u64, Duration) -> JoinHandle<()>) -> bool {
        if self.armed.is_some() {
            return false;
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.detector.reset();
        let task = spawn(epoch, self.period);
        self.armed = Some(Armed { epoch, task });
        info!(epoch, period_ms = self.period.as_millis() as u64, "Drift monitor armed");
        true
    }

    /// Armed → Idle: stop the sampler and discard the divergence count
    ///
    /// Returns false when already idle.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.task.abort();
                self.detector.reset();
                info!(epoch = armed.epoch, "Drift monitor disarmed");
                true
            }
            None => false,
        }
    }

    /// Feed one sample to the detector
    pub fn sample(
        &mut self,
        composite_playing: bool,
        row_time: u64,
        col_time: u64,
    ) -> Option<Correction> {
        let correction = self.detector.sample(composite_playing, row_time, col_time);
        debug!(
            row_time,
            col_time,
            divergent_samples = self.detector.divergent_samples(),
            "Drift sample"
        );
        correction
    }
}

impl Drop for DriftMonitor {
    fn drop(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.task.abort();
        }
    }
}

/// Start a periodic task calling `tick` every `period`
///
/// The first call happens one full period after start. The task ends when
/// `tick` returns false.
pub fn spawn_sampler(
    runtime: &Handle,
    period: Duration,
    mut tick: impl FnMut() -> bool + Send + 'static,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !tick() {
                break;
            }
        }
    })
}

/// Issue a corrective seek without waiting for it
pub(crate) fn dispatch_correction(
    runtime: &Handle,
    cluster: &str,
    leg: Arc<dyn Leg>,
    correction: Correction,
) {
    let cluster = cluster.to_string();
    info!(
        cluster = %cluster,
        leg = leg.name(),
        lagging = %correction.lagging,
        target_ms = correction.target_ms,
        "Correcting drift"
    );

    runtime.spawn(async move {
        if let Err(e) = leg.seek(correction.target_ms).await {
            warn!(cluster = %cluster, leg = leg.name(), "Corrective seek failed: {}", e);
        }
    });
}
