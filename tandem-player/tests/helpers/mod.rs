//! Test helper modules for tandem-player integration tests
//!
//! - MockLeg: scriptable leg that records the commands it receives
//! - settle: let spawned forced commands and drift ticks run

#![allow(dead_code)]

pub mod mock_leg;

pub use mock_leg::{Command, CommandKind, MockLeg};

use std::sync::Arc;
use tandem_common::config::SyncConfig;
use tandem_player::{ClusterPlayer, Leg};

/// Yield enough times for fire-and-forget tasks to complete
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Cluster over two mock legs with default sync settings
pub fn cluster_of(row: &Arc<MockLeg>, col: &Arc<MockLeg>) -> ClusterPlayer {
    let row: Arc<dyn Leg> = row.clone();
    let col: Arc<dyn Leg> = col.clone();
    ClusterPlayer::new(row, col, SyncConfig::default()).expect("cluster")
}
