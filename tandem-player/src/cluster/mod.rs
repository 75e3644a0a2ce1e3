//! Cluster player - two legs presented as one
//!
//! **Responsibilities:**
//! - Fan out ready/play/pause/stop/seek/rate commands to both legs
//! - Merge leg statuses into one composite status
//! - Force legs into compatible states (sync protocol)
//! - Track the longer leg as the clock reference
//! - Keep both legs at the same playback rate
//! - Run the drift monitor while both legs play
//! - Re-announce composite changes so a cluster can itself be a leg
//!
//! Every notification handler takes the state lock before it reads either
//! leg, so handlers never interleave and each one sees the legs as they are
//! once it runs. Leg accessors never take a cluster lock. Leg commands and
//! outgoing notifications are collected while locked and issued only after
//! the lock is released; a leg that notifies synchronously from inside a
//! command therefore re-enters cleanly.

pub mod drift;
pub mod merge;
pub mod protocol;
pub mod rate;
pub mod reference;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tandem_common::config::SyncConfig;
use tandem_common::events::lock;
use tandem_common::{Emitter, Error, LegEvent, Listener, PlayerStatus, Result, Subscription};
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

use crate::leg::Leg;
use drift::{dispatch_correction, spawn_sampler, DriftMonitor};
use merge::merge_status;
use protocol::{dispatch, sync_action, LegView, SyncCommand, SyncTarget};
use rate::propagated_rate;
use reference::ReferenceSelector;

/// Position of a leg inside a cluster
///
/// Order carries no meaning beyond tie-breaking in favour of `Row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSlot {
    Row,
    Col,
}

impl LegSlot {
    pub const BOTH: [LegSlot; 2] = [LegSlot::Row, LegSlot::Col];

    pub fn other(self) -> Self {
        match self {
            LegSlot::Row => LegSlot::Col,
            LegSlot::Col => LegSlot::Row,
        }
    }
}

impl std::fmt::Display for LegSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegSlot::Row => write!(f, "row"),
            LegSlot::Col => write!(f, "col"),
        }
    }
}

/// Point-in-time view of a cluster, for observers and logs
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSnapshot {
    pub name: String,
    pub status: PlayerStatus,
    pub duration_ms: u64,
    pub current_time_ms: u64,
    pub playback_rate: f64,
    pub reference: LegSlot,
    pub drift_armed: bool,
    pub divergent_samples: u32,
    pub row_time_ms: u64,
    pub col_time_ms: u64,
    pub taken_at: DateTime<Utc>,
}

/// Derived composite state; never authoritative over the legs
struct ClusterState {
    status: PlayerStatus,
    duration: u64,
    current_time: u64,
    playback_rate: f64,
    reference: ReferenceSelector,
    drift: DriftMonitor,
}

/// Side effects decided under the state lock, applied after release
#[derive(Default)]
struct Effects {
    notify: Vec<LegEvent>,
    commands: Vec<(LegSlot, SyncCommand)>,
    rate: Option<f64>,
}

/// Holds the reentrancy guard for as long as it lives
struct StatusGuard<'a>(&'a AtomicUsize);

impl<'a> StatusGuard<'a> {
    fn hold(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    name: String,
    config: SyncConfig,
    row: Arc<dyn Leg>,
    col: Arc<dyn Leg>,
    runtime: Handle,
    me: Weak<Inner>,
    state: Mutex<ClusterState>,
    /// Status pushes are ignored while non-zero
    ignore_set_status: AtomicUsize,
    emitter: Emitter,
    subscriptions: Mutex<Vec<Subscription>>,
    destroyed: AtomicBool,
}

/// Composite player driving two legs as one
///
/// Cloning yields another handle to the same cluster.
#[derive(Clone)]
pub struct ClusterPlayer {
    inner: Arc<Inner>,
}

impl ClusterPlayer {
    /// Build a cluster over two already constructed legs
    ///
    /// Must be called from within a tokio runtime; forced leg commands and
    /// the drift monitor run on it.
    pub fn new(row: Arc<dyn Leg>, col: Arc<dyn Leg>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("ClusterPlayer requires a tokio runtime: {}", e)))?;

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{{{}-{}}}", display_name(&*row), display_name(&*col)));

        let reference = ReferenceSelector::new(row.duration(), col.duration());
        let reference_leg = match reference.reference() {
            LegSlot::Row => &row,
            LegSlot::Col => &col,
        };
        let (row_status, col_status) = (row.status(), col.status());
        let state = ClusterState {
            status: merge_status(row_status, col_status)
                .or_else(|| merge_status(col_status, row_status))
                .unwrap_or(PlayerStatus::Ready),
            duration: reference_leg.duration(),
            current_time: 0,
            playback_rate: reference_leg.playback_rate(),
            reference,
            drift: DriftMonitor::new(&config),
        };

        let inner = Arc::new_cyclic(|me| Inner {
            name,
            config,
            row,
            col,
            runtime,
            me: me.clone(),
            state: Mutex::new(state),
            ignore_set_status: AtomicUsize::new(0),
            emitter: Emitter::new(),
            subscriptions: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        });
        inner.subscribe_legs();

        info!(
            cluster = %inner.name,
            reference = %reference.reference(),
            duration_ms = inner.state().duration,
            "Cluster player created"
        );
        Ok(Self { inner })
    }

    pub fn row(&self) -> &Arc<dyn Leg> {
        &self.inner.row
    }

    pub fn col(&self) -> &Arc<dyn Leg> {
        &self.inner.col
    }

    pub fn leg(&self, slot: LegSlot) -> &Arc<dyn Leg> {
        self.inner.leg(slot)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The leg currently driving the composite clock
    pub fn reference(&self) -> LegSlot {
        self.inner.state().reference.reference()
    }

    /// Whether the drift monitor is currently sampling
    pub fn is_drift_armed(&self) -> bool {
        self.inner.state().drift.is_armed()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let state = self.inner.state();
        let row_time_ms = self.inner.row.current_time();
        let col_time_ms = self.inner.col.current_time();
        ClusterSnapshot {
            name: self.inner.name.clone(),
            status: state.status,
            duration_ms: state.duration,
            current_time_ms: state.current_time,
            playback_rate: state.playback_rate,
            reference: state.reference.reference(),
            drift_armed: state.drift.is_armed(),
            divergent_samples: state.drift.divergent_samples(),
            row_time_ms,
            col_time_ms,
            taken_at: tandem_common::time::now(),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(Error::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for ClusterPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterPlayer")
            .field("name", &self.inner.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

fn display_name(leg: &dyn Leg) -> &str {
    let name = leg.name();
    if name.is_empty() {
        "unknown"
    } else {
        name
    }
}

/// Collapse per-leg results, keeping the first failure
fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ClusterState> {
        lock(&self.state)
    }

    fn leg(&self, slot: LegSlot) -> &Arc<dyn Leg> {
        match slot {
            LegSlot::Row => &self.row,
            LegSlot::Col => &self.col,
        }
    }

    /// Legs that have not reached their end
    fn active_legs(&self) -> Vec<&Arc<dyn Leg>> {
        [&self.row, &self.col]
            .into_iter()
            .filter(|leg| leg.status() != PlayerStatus::Ended)
            .collect()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Register the four notification listeners on both legs
    fn subscribe_legs(&self) {
        let mut subscriptions = Vec::with_capacity(LegSlot::BOTH.len() * LegEvent::ALL.len());
        for slot in LegSlot::BOTH {
            for event in LegEvent::ALL {
                let me = self.me.clone();
                let listener: Listener = Arc::new(move || {
                    if let Some(inner) = me.upgrade() {
                        inner.on_leg_event(slot, event);
                    }
                });
                subscriptions.push(self.leg(slot).subscribe(event, listener));
            }
        }
        *lock(&self.subscriptions) = subscriptions;
    }

    fn on_leg_event(&self, emitter: LegSlot, event: LegEvent) {
        if self.is_destroyed() {
            return;
        }
        match event {
            LegEvent::StatusChanged => self.on_status(emitter),
            LegEvent::TimeUpdated => self.on_time(emitter),
            LegEvent::DurationChanged => self.on_duration(emitter),
            LegEvent::RateChanged => self.on_rate(emitter),
        }
    }

    /// Status merge, then sync protocol, then drift monitor (re)arming
    fn on_status(&self, emitter_slot: LegSlot) {
        if self.ignore_set_status.load(Ordering::SeqCst) > 0 {
            trace!(cluster = %self.name, leg = %emitter_slot, "Status push ignored");
            return;
        }

        let mut effects = Effects::default();
        {
            let mut state = self.state();
            let emitter = LegView::of(&**self.leg(emitter_slot));
            let receptor = LegView::of(&**self.leg(emitter_slot.other()));

            if let Some(status) = merge_status(emitter.status, receptor.status) {
                if status != state.status {
                    debug!(
                        cluster = %self.name,
                        leg = %emitter_slot,
                        emitter = %emitter.status,
                        receptor = %receptor.status,
                        "Composite status {} -> {}",
                        state.status,
                        status
                    );
                    state.status = status;
                    effects.notify.push(LegEvent::StatusChanged);
                }
            }

            if let Some(action) = sync_action(emitter, receptor) {
                let target = match action.target {
                    SyncTarget::Emitter => emitter_slot,
                    SyncTarget::Receptor => emitter_slot.other(),
                };
                effects.commands.push((target, action.command));
            }

            if emitter.status.is_playing() && receptor.status.is_playing() {
                let me = self.me.clone();
                let runtime = self.runtime.clone();
                state.drift.arm(|epoch, period| {
                    spawn_sampler(&runtime, period, move || match me.upgrade() {
                        Some(inner) => inner.on_drift_tick(epoch),
                        None => false,
                    })
                });
            } else {
                state.drift.disarm();
            }
        }
        self.apply(effects);
    }

    fn on_time(&self, emitter_slot: LegSlot) {
        let leg = self.leg(emitter_slot);
        let mut effects = Effects::default();
        {
            let mut state = self.state();
            let status = leg.status();
            let time = leg.current_time();
            if !state.reference.accepts_time(emitter_slot, status) {
                return;
            }
            if state.current_time != time {
                trace!(cluster = %self.name, leg = %emitter_slot, time_ms = time, "Composite time");
                state.current_time = time;
                effects.notify.push(LegEvent::TimeUpdated);
            }
        }
        self.apply(effects);
    }

    fn on_duration(&self, emitter_slot: LegSlot) {
        let mut effects = Effects::default();
        {
            let mut state = self.state();
            let emitter_duration = self.leg(emitter_slot).duration();
            let receptor_duration = self.leg(emitter_slot.other()).duration();
            state
                .reference
                .on_duration_changed(emitter_slot, emitter_duration, receptor_duration);
            let duration = match state.reference.reference() {
                r if r == emitter_slot => emitter_duration,
                _ => receptor_duration,
            };
            if state.duration != duration {
                debug!(
                    cluster = %self.name,
                    reference = %state.reference.reference(),
                    "Composite duration {}ms -> {}ms",
                    state.duration,
                    duration
                );
                state.duration = duration;
                effects.notify.push(LegEvent::DurationChanged);
            }
        }
        self.apply(effects);
    }

    fn on_rate(&self, emitter_slot: LegSlot) {
        let mut effects = Effects::default();
        {
            let mut state = self.state();
            let leg_rate = self.leg(emitter_slot).playback_rate();
            if let Some(rate) =
                propagated_rate(leg_rate, state.playback_rate, self.config.rate_tolerance)
            {
                debug!(
                    cluster = %self.name,
                    leg = %emitter_slot,
                    "Propagating playback rate {} -> {}",
                    state.playback_rate,
                    rate
                );
                state.playback_rate = rate;
                effects.notify.push(LegEvent::RateChanged);
                effects.rate = Some(rate);
            }
        }
        self.apply(effects);
    }

    /// One drift sample; returns false once this arming has been cancelled
    fn on_drift_tick(&self, epoch: u64) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let mut state = self.state();
        if !state.drift.is_current(epoch) {
            return false;
        }
        let row_time = self.row.current_time();
        let col_time = self.col.current_time();
        // Legs too: their pushes are ignored during a silent ready
        let playing = state.status.is_playing() && self.row.is_playing() && self.col.is_playing();
        if let Some(correction) = state.drift.sample(playing, row_time, col_time) {
            // Issued under the lock so a concurrent disarm cannot slip in
            // between the epoch check and the seek.
            dispatch_correction(
                &self.runtime,
                &self.name,
                Arc::clone(self.leg(correction.lagging)),
                correction,
            );
        }
        true
    }

    fn apply(&self, effects: Effects) {
        for event in effects.notify {
            self.emitter.emit(event);
        }
        if let Some(rate) = effects.rate {
            self.row.set_playback_rate(rate);
            self.col.set_playback_rate(rate);
        }
        for (slot, command) in effects.commands {
            dispatch(&self.runtime, &self.name, Arc::clone(self.leg(slot)), command);
        }
    }
}

#[async_trait]
impl Leg for ClusterPlayer {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn status(&self) -> PlayerStatus {
        self.inner.state().status
    }

    fn duration(&self) -> u64 {
        self.inner.state().duration
    }

    fn current_time(&self) -> u64 {
        self.inner.state().current_time
    }

    fn playback_rate(&self) -> f64 {
        self.inner.state().playback_rate
    }

    fn is_ready(&self) -> bool {
        self.inner.row.is_ready() && self.inner.col.is_ready()
    }

    fn subscribe(&self, event: LegEvent, listener: Listener) -> Subscription {
        self.inner.emitter.on(event, listener)
    }

    async fn ready(&self, silently: bool) -> Result<()> {
        self.ensure_alive()?;
        let _guard = silently.then(|| StatusGuard::hold(&self.inner.ignore_set_status));
        first_error(
            join_all(self.inner.active_legs().into_iter().map(|leg| leg.ready(silently))).await,
        )
    }

    async fn play(&self) -> Result<()> {
        self.ensure_alive()?;
        // One leg may still be idle while the composite reads Playing, so
        // only Ended short-circuits.
        if self.status() == PlayerStatus::Ended {
            debug!(cluster = %self.inner.name, "Play ignored: cluster has ended");
            return Ok(());
        }
        first_error(join_all(self.inner.active_legs().into_iter().map(|leg| leg.play())).await)
    }

    async fn pause(&self) -> Result<()> {
        self.ensure_alive()?;
        first_error(join_all(self.inner.active_legs().into_iter().map(|leg| leg.pause())).await)
    }

    async fn stop(&self) -> Result<()> {
        self.ensure_alive()?;
        first_error(join_all(self.inner.active_legs().into_iter().map(|leg| leg.stop())).await)
    }

    async fn seek(&self, ms: u64) -> Result<()> {
        self.ensure_alive()?;
        // Ended legs included: seeking back is how a finished cluster resumes
        let (row, col) = tokio::join!(self.inner.row.seek(ms), self.inner.col.seek(ms));
        first_error(vec![row, col])
    }

    fn set_playback_rate(&self, rate: f64) {
        if self.is_destroyed() {
            return;
        }
        let changed = {
            let mut state = self.inner.state();
            match propagated_rate(rate, state.playback_rate, self.inner.config.rate_tolerance) {
                Some(rate) => {
                    state.playback_rate = rate;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.inner.emitter.emit(LegEvent::RateChanged);
        }
        self.inner.row.set_playback_rate(rate);
        self.inner.col.set_playback_rate(rate);
    }

    fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state().drift.disarm();

        let subscriptions = std::mem::take(&mut *lock(&self.inner.subscriptions));
        for subscription in &subscriptions {
            subscription.dispose();
        }

        self.inner.row.destroy();
        self.inner.col.destroy();
        self.inner.emitter.clear();
        info!(cluster = %self.inner.name, "Cluster player destroyed");
    }
}
