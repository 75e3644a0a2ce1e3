//! Scriptable leg for cluster tests
//!
//! Tests drive the leg's observable state directly (`push_*` methods emit the
//! matching notification) and inspect the commands the cluster sent it.
//! By default commands also take effect, the way a real leg would react;
//! `set_follow_commands(false)` turns the leg into a pure recorder.

use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tandem_common::{Emitter, Error, LegEvent, Listener, PlayerStatus, Result, Subscription};
use tandem_player::Leg;

/// Command received from the cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ready { silently: bool },
    Play,
    Pause,
    Stop,
    Seek(u64),
    SetRate(f64),
    Destroy,
}

/// Command kinds for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ready,
    Play,
    Pause,
    Stop,
    Seek,
}

struct MockState {
    status: PlayerStatus,
    duration: u64,
    time: u64,
    rate: f64,
    commands: Vec<Command>,
    failing: HashSet<CommandKind>,
    follow_commands: bool,
}

/// Parks one `status()` read: signals `entered`, then waits for `release`
struct StatusGate {
    entered: Sender<()>,
    release: Receiver<()>,
}

pub struct MockLeg {
    name: String,
    state: Mutex<MockState>,
    emitter: Emitter,
    status_gate: Mutex<Option<StatusGate>>,
}

impl MockLeg {
    pub fn new(name: &str, duration: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(MockState {
                status: PlayerStatus::Ready,
                duration,
                time: 0,
                rate: 1.0,
                commands: Vec::new(),
                failing: HashSet::new(),
                follow_commands: true,
            }),
            emitter: Emitter::new(),
            status_gate: Mutex::new(None),
        })
    }

    /// Hold the next `status()` call after it has read its value
    ///
    /// Returns (entered, release): `entered` fires once the read is parked,
    /// sending on `release` lets it return the value it read.
    pub fn gate_next_status_read(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        *self.status_gate.lock().unwrap() = Some(StatusGate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Change status without notifying anyone
    pub fn stage_status(&self, status: PlayerStatus) {
        self.state().status = status;
    }

    pub fn stage_time(&self, ms: u64) {
        self.state().time = ms;
    }

    pub fn push_status(&self, status: PlayerStatus) {
        self.state().status = status;
        self.emitter.emit(LegEvent::StatusChanged);
    }

    pub fn push_time(&self, ms: u64) {
        self.state().time = ms;
        self.emitter.emit(LegEvent::TimeUpdated);
    }

    pub fn push_duration(&self, ms: u64) {
        self.state().duration = ms;
        self.emitter.emit(LegEvent::DurationChanged);
    }

    pub fn push_rate(&self, rate: f64) {
        self.state().rate = rate;
        self.emitter.emit(LegEvent::RateChanged);
    }

    pub fn set_follow_commands(&self, follow: bool) {
        self.state().follow_commands = follow;
    }

    /// Make every later command of this kind fail
    pub fn fail_on(&self, kind: CommandKind) {
        self.state().failing.insert(kind);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn count(&self, command: &Command) -> usize {
        self.state().commands.iter().filter(|c| *c == command).count()
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.state()
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::Seek(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        LegEvent::ALL
            .iter()
            .map(|event| self.emitter.listener_count(*event))
            .sum()
    }

    /// Record `command`, then fail or apply it
    fn handle(
        &self,
        kind: CommandKind,
        command: Command,
        apply: impl FnOnce(&mut MockState) -> Vec<LegEvent>,
    ) -> Result<()> {
        let events = {
            let mut state = self.state();
            state.commands.push(command);
            if state.failing.contains(&kind) {
                return Err(Error::leg(&self.name, format!("injected {:?} failure", kind)));
            }
            if !state.follow_commands {
                return Ok(());
            }
            apply(&mut state)
        };
        for event in events {
            self.emitter.emit(event);
        }
        Ok(())
    }
}

fn change_status(state: &mut MockState, status: PlayerStatus) -> Vec<LegEvent> {
    if state.status == status {
        Vec::new()
    } else {
        state.status = status;
        vec![LegEvent::StatusChanged]
    }
}

#[async_trait]
impl Leg for MockLeg {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> PlayerStatus {
        let status = self.state().status;
        let gate = self.status_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        status
    }

    fn duration(&self) -> u64 {
        self.state().duration
    }

    fn current_time(&self) -> u64 {
        self.state().time
    }

    fn playback_rate(&self) -> f64 {
        self.state().rate
    }

    fn is_ready(&self) -> bool {
        matches!(
            self.state().status,
            PlayerStatus::Ready | PlayerStatus::Playing | PlayerStatus::Pause
        )
    }

    fn subscribe(&self, event: LegEvent, listener: Listener) -> Subscription {
        self.emitter.on(event, listener)
    }

    async fn ready(&self, silently: bool) -> Result<()> {
        self.handle(CommandKind::Ready, Command::Ready { silently }, |s| {
            change_status(s, PlayerStatus::Ready)
        })
    }

    async fn play(&self) -> Result<()> {
        self.handle(CommandKind::Play, Command::Play, |s| {
            change_status(s, PlayerStatus::Playing)
        })
    }

    async fn pause(&self) -> Result<()> {
        self.handle(CommandKind::Pause, Command::Pause, |s| {
            change_status(s, PlayerStatus::Pause)
        })
    }

    async fn stop(&self) -> Result<()> {
        self.handle(CommandKind::Stop, Command::Stop, |s| {
            s.time = 0;
            change_status(s, PlayerStatus::Ready)
        })
    }

    async fn seek(&self, ms: u64) -> Result<()> {
        self.handle(CommandKind::Seek, Command::Seek(ms), |s| {
            s.time = ms;
            vec![LegEvent::TimeUpdated]
        })
    }

    fn set_playback_rate(&self, rate: f64) {
        let changed = {
            let mut state = self.state();
            state.commands.push(Command::SetRate(rate));
            let changed = state.follow_commands && state.rate != rate;
            if changed {
                state.rate = rate;
            }
            changed
        };
        if changed {
            self.emitter.emit(LegEvent::RateChanged);
        }
    }

    fn destroy(&self) {
        self.state().commands.push(Command::Destroy);
        self.emitter.clear();
    }
}
