//! # Tandem Common Library
//!
//! Shared vocabulary for the tandem player crates:
//! - Player status and leg notification types
//! - Listener registry and subscription disposers
//! - Configuration loading
//! - Error types and small time/rate utilities

pub mod config;
pub mod error;
pub mod events;
pub mod rate;
pub mod status;
pub mod time;

pub use error::{Error, Result};
pub use events::{Emitter, LegEvent, Listener, Subscription};
pub use status::PlayerStatus;
