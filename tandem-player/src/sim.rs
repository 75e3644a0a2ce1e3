//! Simulated leg
//!
//! A clock-driven stand-in for a real media leg. Its position advances at
//! `playback_rate × skew` while playing, it announces time updates on a fixed
//! cadence, and it ends when it reaches a non-zero duration. A skew other
//! than 1.0 makes it drift against a well-behaved partner, which is what the
//! demo binary and the drift tests rely on.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tandem_common::events::lock;
use tandem_common::rate::is_rate_equal;
use tandem_common::{Emitter, Error, LegEvent, Listener, PlayerStatus, Result, Subscription};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::leg::Leg;

/// Simulated leg parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimOptions {
    /// Timeline length; 0 plays forever
    pub duration_ms: u64,

    /// Clock speed factor relative to real time at rate 1.0
    pub skew: f64,

    /// Cadence of time-updated notifications while playing
    pub time_update_interval_ms: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            skew: 1.0,
            time_update_interval_ms: 250,
        }
    }
}

struct SimState {
    status: PlayerStatus,
    duration: u64,
    rate: f64,
    /// Position at `anchor`, or the frozen position when not playing
    base_ms: f64,
    anchor: Option<Instant>,
    /// Resume playing once buffering ends
    resume_after_buffering: bool,
    ticker: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl SimState {
    fn position(&self, skew: f64) -> f64 {
        let pos = match self.anchor {
            Some(anchor) => {
                self.base_ms + anchor.elapsed().as_secs_f64() * 1000.0 * self.rate * skew
            }
            None => self.base_ms,
        };
        if self.duration > 0 {
            pos.min(self.duration as f64)
        } else {
            pos
        }
    }

    /// Stop the clock at its current position
    fn freeze(&mut self, skew: f64) {
        self.base_ms = self.position(skew);
        self.anchor = None;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn reached_end(&self, skew: f64) -> bool {
        self.duration > 0 && self.position(skew) >= self.duration as f64
    }
}

struct SimCore {
    name: String,
    options: SimOptions,
    state: Mutex<SimState>,
    emitter: Emitter,
}

impl SimCore {
    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    fn emit_all(&self, events: &[LegEvent]) {
        for event in events {
            self.emitter.emit(*event);
        }
    }
}

/// Virtual-clock leg
pub struct SimulatedLeg {
    core: Arc<SimCore>,
    runtime: Handle,
}

impl SimulatedLeg {
    /// Create a leg in Ready status at position 0
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, options: SimOptions) -> Result<Self> {
        if options.time_update_interval_ms == 0 {
            return Err(Error::Config(
                "time_update_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !options.skew.is_finite() || options.skew <= 0.0 {
            return Err(Error::Config(format!(
                "skew must be a positive number, got {}",
                options.skew
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("SimulatedLeg requires a tokio runtime: {}", e)))?;

        let state = SimState {
            status: PlayerStatus::Ready,
            duration: options.duration_ms,
            rate: 1.0,
            base_ms: 0.0,
            anchor: None,
            resume_after_buffering: false,
            ticker: None,
            destroyed: false,
        };
        Ok(Self {
            core: Arc::new(SimCore {
                name: name.into(),
                options,
                state: Mutex::new(state),
                emitter: Emitter::new(),
            }),
            runtime,
        })
    }

    /// Stall the leg as if waiting for data
    pub fn begin_buffering(&self) {
        let skew = self.core.options.skew;
        {
            let mut state = self.core.state();
            if state.destroyed || matches!(state.status, PlayerStatus::Buffering | PlayerStatus::Ended)
            {
                return;
            }
            state.resume_after_buffering = state.status == PlayerStatus::Playing;
            state.freeze(skew);
            state.status = PlayerStatus::Buffering;
        }
        debug!(leg = %self.core.name, "Buffering");
        self.core.emit_all(&[LegEvent::StatusChanged]);
    }

    /// Resolve a stall; playing resumes if the leg was playing or was asked to play
    pub fn end_buffering(&self) {
        {
            let mut state = self.core.state();
            if state.destroyed || state.status != PlayerStatus::Buffering {
                return;
            }
            if state.resume_after_buffering {
                self.start_clock(&mut state);
            } else {
                state.status = PlayerStatus::Ready;
            }
            state.resume_after_buffering = false;
        }
        debug!(leg = %self.core.name, "Buffering finished");
        self.core.emit_all(&[LegEvent::StatusChanged]);
    }

    /// Report a newly discovered duration
    pub fn set_duration(&self, duration_ms: u64) {
        let skew = self.core.options.skew;
        {
            let mut state = self.core.state();
            if state.destroyed || state.duration == duration_ms {
                return;
            }
            let pos = state.position(skew);
            state.base_ms = pos;
            if state.anchor.is_some() {
                state.anchor = Some(Instant::now());
            }
            state.duration = duration_ms;
        }
        self.core.emit_all(&[LegEvent::DurationChanged]);
    }

    pub fn options(&self) -> &SimOptions {
        &self.core.options
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.state().destroyed
    }

    /// Enter Playing and start the time-update ticker; caller holds the lock
    fn start_clock(&self, state: &mut SimState) {
        state.status = PlayerStatus::Playing;
        state.anchor = Some(Instant::now());
        if let Some(old) = state.ticker.take() {
            old.abort();
        }
        state.ticker = Some(spawn_ticker(
            &self.runtime,
            Arc::downgrade(&self.core),
            Duration::from_millis(self.core.options.time_update_interval_ms),
        ));
    }

    fn alive(&self) -> Result<MutexGuard<'_, SimState>> {
        let state = self.core.state();
        if state.destroyed {
            Err(Error::Destroyed)
        } else {
            Ok(state)
        }
    }
}

/// Announce time while playing and detect the end of the timeline
fn spawn_ticker(runtime: &Handle, core: Weak<SimCore>, period: Duration) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(core) = core.upgrade() else { break };
            let skew = core.options.skew;

            let ended = {
                let mut state = core.state();
                if state.status != PlayerStatus::Playing {
                    break;
                }
                let ended = state.reached_end(skew);
                if ended {
                    state.base_ms = state.duration as f64;
                    state.anchor = None;
                    state.status = PlayerStatus::Ended;
                    state.ticker = None;
                }
                ended
            };

            trace!(leg = %core.name, "Time update");
            core.emitter.emit(LegEvent::TimeUpdated);
            if ended {
                core.emitter.emit(LegEvent::StatusChanged);
                debug!(leg = %core.name, "Reached end of timeline");
                break;
            }
        }
    })
}

#[async_trait]
impl Leg for SimulatedLeg {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn status(&self) -> PlayerStatus {
        self.core.state().status
    }

    fn duration(&self) -> u64 {
        self.core.state().duration
    }

    fn current_time(&self) -> u64 {
        self.core.state().position(self.core.options.skew).round() as u64
    }

    fn playback_rate(&self) -> f64 {
        self.core.state().rate
    }

    fn is_ready(&self) -> bool {
        matches!(
            self.core.state().status,
            PlayerStatus::Ready | PlayerStatus::Playing | PlayerStatus::Pause
        )
    }

    fn subscribe(&self, event: LegEvent, listener: Listener) -> Subscription {
        self.core.emitter.on(event, listener)
    }

    async fn ready(&self, silently: bool) -> Result<()> {
        let skew = self.core.options.skew;
        {
            let mut state = self.alive()?;
            match state.status {
                PlayerStatus::Ready => return Ok(()),
                // A stalled leg becomes ready when its data arrives
                PlayerStatus::Buffering => {
                    state.resume_after_buffering = false;
                    return Ok(());
                }
                _ => {}
            }
            state.freeze(skew);
            state.status = PlayerStatus::Ready;
        }
        debug!(leg = %self.core.name, silently, "Ready");
        self.core.emit_all(&[LegEvent::StatusChanged]);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        {
            let mut state = self.alive()?;
            match state.status {
                PlayerStatus::Playing | PlayerStatus::Ended => return Ok(()),
                PlayerStatus::Buffering => {
                    state.resume_after_buffering = true;
                    return Ok(());
                }
                _ => {}
            }
            self.start_clock(&mut state);
        }
        debug!(leg = %self.core.name, "Playing");
        self.core.emit_all(&[LegEvent::StatusChanged]);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let skew = self.core.options.skew;
        {
            let mut state = self.alive()?;
            if matches!(state.status, PlayerStatus::Pause | PlayerStatus::Ended) {
                return Ok(());
            }
            state.freeze(skew);
            state.resume_after_buffering = false;
            state.status = PlayerStatus::Pause;
        }
        debug!(leg = %self.core.name, "Paused");
        self.core.emit_all(&[LegEvent::StatusChanged]);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.alive()?;
            let skew = self.core.options.skew;
            if state.status != PlayerStatus::Ready {
                events.push(LegEvent::StatusChanged);
            }
            if state.position(skew) != 0.0 {
                events.push(LegEvent::TimeUpdated);
            }
            state.freeze(skew);
            state.base_ms = 0.0;
            state.resume_after_buffering = false;
            state.status = PlayerStatus::Ready;
        }
        debug!(leg = %self.core.name, "Stopped");
        self.core.emit_all(&events);
        Ok(())
    }

    async fn seek(&self, ms: u64) -> Result<()> {
        let mut events = vec![LegEvent::TimeUpdated];
        {
            let mut state = self.alive()?;
            let target = if state.duration > 0 {
                ms.min(state.duration)
            } else {
                ms
            };
            state.base_ms = target as f64;
            if state.anchor.is_some() {
                state.anchor = Some(Instant::now());
            }
            if state.status == PlayerStatus::Ended
                && (state.duration == 0 || target < state.duration)
            {
                state.status = PlayerStatus::Pause;
                events.push(LegEvent::StatusChanged);
            }
        }
        debug!(leg = %self.core.name, ms, "Seeked");
        self.core.emit_all(&events);
        Ok(())
    }

    fn set_playback_rate(&self, rate: f64) {
        let skew = self.core.options.skew;
        {
            let mut state = self.core.state();
            if state.destroyed || is_rate_equal(state.rate, rate) {
                return;
            }
            state.base_ms = state.position(skew);
            if state.anchor.is_some() {
                state.anchor = Some(Instant::now());
            }
            state.rate = rate;
        }
        debug!(leg = %self.core.name, rate, "Playback rate changed");
        self.core.emit_all(&[LegEvent::RateChanged]);
    }

    fn destroy(&self) {
        let skew = self.core.options.skew;
        {
            let mut state = self.core.state();
            if state.destroyed {
                return;
            }
            state.freeze(skew);
            state.destroyed = true;
        }
        self.core.emitter.clear();
        debug!(leg = %self.core.name, "Destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn leg(duration_ms: u64) -> SimulatedLeg {
        SimulatedLeg::new(
            "sim",
            SimOptions {
                duration_ms,
                ..SimOptions::default()
            },
        )
        .unwrap()
    }

    fn count(leg: &SimulatedLeg, event: LegEvent) -> (Arc<AtomicUsize>, Subscription) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&n);
        let sub = leg.subscribe(
            event,
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (n, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_advances_while_playing() {
        let leg = leg(0);
        leg.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(leg.current_time(), 1500);

        leg.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(leg.current_time(), 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skew_and_rate_scale_clock() {
        let leg = SimulatedLeg::new(
            "fast",
            SimOptions {
                skew: 1.5,
                ..SimOptions::default()
            },
        )
        .unwrap();
        leg.set_playback_rate(2.0);
        leg.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(leg.current_time(), 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_end() {
        let leg = leg(1000);
        let (status_events, _s) = count(&leg, LegEvent::StatusChanged);
        leg.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(leg.status(), PlayerStatus::Ended);
        assert_eq!(leg.current_time(), 1000);
        assert_eq!(status_events.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_updates_on_cadence() {
        let leg = leg(0);
        let (updates, _s) = count(&leg, LegEvent::TimeUpdated);
        leg.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1010)).await;
        assert_eq!(updates.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_operations_idempotent() {
        let leg = leg(5000);
        let (status_events, _s) = count(&leg, LegEvent::StatusChanged);
        leg.ready(false).await.unwrap();
        assert_eq!(status_events.load(Ordering::SeqCst), 0);

        leg.play().await.unwrap();
        leg.play().await.unwrap();
        assert_eq!(status_events.load(Ordering::SeqCst), 1);

        leg.set_playback_rate(1.0);
        leg.pause().await.unwrap();
        leg.pause().await.unwrap();
        assert_eq!(status_events.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_seek_resumes_ended_leg() {
        let leg = leg(1000);
        leg.seek(5000).await.unwrap();
        assert_eq!(leg.current_time(), 1000);

        // Force the ended state the ticker would produce
        {
            let mut state = leg.core.state();
            state.status = PlayerStatus::Ended;
        }
        leg.seek(200).await.unwrap();
        assert_eq!(leg.status(), PlayerStatus::Pause);
        assert_eq!(leg.current_time(), 200);
    }

    #[tokio::test]
    async fn test_buffering_resumes_playback() {
        let leg = leg(0);
        leg.play().await.unwrap();
        leg.begin_buffering();
        assert_eq!(leg.status(), PlayerStatus::Buffering);
        assert!(!leg.is_ready());

        leg.end_buffering();
        assert_eq!(leg.status(), PlayerStatus::Playing);
    }

    #[tokio::test]
    async fn test_ready_cancels_resume_after_buffering() {
        let leg = leg(0);
        leg.play().await.unwrap();
        leg.begin_buffering();
        leg.ready(false).await.unwrap();
        leg.end_buffering();
        assert_eq!(leg.status(), PlayerStatus::Ready);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_final() {
        let leg = leg(1000);
        leg.destroy();
        leg.destroy();
        assert!(leg.is_destroyed());
        assert!(matches!(leg.play().await, Err(Error::Destroyed)));
    }

    #[tokio::test]
    async fn test_rejects_zero_cadence() {
        let result = SimulatedLeg::new(
            "bad",
            SimOptions {
                time_update_interval_ms: 0,
                ..SimOptions::default()
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
