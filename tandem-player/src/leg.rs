//! Leg capability
//!
//! A leg is any player the cluster can drive. The cluster depends only on
//! this trait, and implements it itself, so clusters nest.

use async_trait::async_trait;
use tandem_common::{LegEvent, Listener, PlayerStatus, Result, Subscription};

/// Player capability set consumed (and exposed) by [`crate::ClusterPlayer`]
///
/// Accessors are cheap synchronous reads. Notifications registered through
/// [`Leg::subscribe`] fire after the new value is visible through the
/// accessors. Every operation must be safe to call when the leg is already
/// in the target state.
#[async_trait]
pub trait Leg: Send + Sync {
    /// Display name, used in logs and composite names
    fn name(&self) -> &str;

    fn status(&self) -> PlayerStatus;

    /// Duration in milliseconds; 0 means unknown / no effective limit
    fn duration(&self) -> u64;

    /// Current position in milliseconds
    fn current_time(&self) -> u64;

    fn playback_rate(&self) -> f64;

    /// Whether the leg can start playing without further preparation
    fn is_ready(&self) -> bool;

    fn is_playing(&self) -> bool {
        self.status().is_playing()
    }

    /// Register a listener for one notification kind
    fn subscribe(&self, event: LegEvent, listener: Listener) -> Subscription;

    /// Prepare for playback; `silently` suppresses the resulting status push
    async fn ready(&self, silently: bool) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Jump to `ms`
    async fn seek(&self, ms: u64) -> Result<()>;

    fn set_playback_rate(&self, rate: f64);

    /// Release the leg; must not fail on an already ended or destroyed leg
    fn destroy(&self);
}
