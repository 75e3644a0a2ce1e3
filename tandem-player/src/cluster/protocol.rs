//! Sync protocol
//!
//! When one leg changes status, decide whether a leg must be forced into a
//! compatible state so the pair keeps playing together. The decision is a
//! pure function of both legs' observable state; dispatch happens
//! separately and is fire-and-forget.

use std::sync::Arc;

use tandem_common::PlayerStatus;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::leg::Leg;

/// What the protocol needs to know about a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegView {
    pub status: PlayerStatus,
    pub duration: u64,
    pub current_time: u64,
}

impl LegView {
    pub fn of(leg: &dyn Leg) -> Self {
        Self {
            status: leg.status(),
            duration: leg.duration(),
            current_time: leg.current_time(),
        }
    }
}

/// Which leg a forced command is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    /// The leg whose status change triggered the protocol
    Emitter,
    /// The other leg
    Receptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Pause,
    /// Re-prepare, holding the leg until the other one catches up
    Ready,
    Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncAction {
    pub target: SyncTarget,
    pub command: SyncCommand,
}

impl SyncAction {
    fn receptor(command: SyncCommand) -> Self {
        Self {
            target: SyncTarget::Receptor,
            command,
        }
    }

    fn emitter(command: SyncCommand) -> Self {
        Self {
            target: SyncTarget::Emitter,
            command,
        }
    }
}

/// Forced action after `emitter` reported its current status, if any
///
/// - Pause while the other leg plays: pause it too.
/// - Buffering while the other leg plays: hold the other leg in Ready.
/// - Playing while the other leg buffers: the emitter waits instead.
/// - Playing while the other leg sits in Ready: start it, unless the
///   emitter is already past the other leg's end. A zero duration counts as
///   unbounded.
pub fn sync_action(emitter: LegView, receptor: LegView) -> Option<SyncAction> {
    match emitter.status {
        PlayerStatus::Pause if receptor.status.is_playing() => {
            Some(SyncAction::receptor(SyncCommand::Pause))
        }
        PlayerStatus::Buffering if receptor.status == PlayerStatus::Playing => {
            Some(SyncAction::receptor(SyncCommand::Ready))
        }
        PlayerStatus::Playing => match receptor.status {
            PlayerStatus::Buffering => Some(SyncAction::emitter(SyncCommand::Ready)),
            PlayerStatus::Ready
                if receptor.duration == 0 || emitter.current_time < receptor.duration =>
            {
                Some(SyncAction::receptor(SyncCommand::Play))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Issue a forced command without waiting for it
///
/// Failures are logged and dropped: the command was not caller-initiated,
/// and retrying could feed a correction loop.
pub(crate) fn dispatch(runtime: &Handle, cluster: &str, leg: Arc<dyn Leg>, command: SyncCommand) {
    let cluster = cluster.to_string();
    debug!(cluster = %cluster, leg = leg.name(), ?command, "Sync protocol forcing leg");

    runtime.spawn(async move {
        let result = match command {
            SyncCommand::Pause => leg.pause().await,
            SyncCommand::Ready => leg.ready(false).await,
            SyncCommand::Play => leg.play().await,
        };
        if let Err(e) = result {
            warn!(cluster = %cluster, leg = leg.name(), ?command, "Forced leg command failed: {}", e);
        }
    });
}
