//! # Tandem Player Library
//!
//! Keeps two independently clocked players ("legs") in step and presents
//! them as a single composite player.
//!
//! **Architecture:** legs publish status/time/duration/rate notifications;
//! the [`ClusterPlayer`] merges them into one status, picks the longer leg as
//! the clock reference, forces lagging or racing legs back in line, and runs
//! a drift monitor while both legs play.

pub mod cluster;
pub mod config;
pub mod leg;
pub mod sim;

pub use cluster::{ClusterPlayer, ClusterSnapshot, LegSlot};
pub use leg::Leg;
pub use sim::SimulatedLeg;
pub use tandem_common::{Error, PlayerStatus, Result};
