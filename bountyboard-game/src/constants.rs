//! Centralized balance and tuning constants for Bountyboard game logic.
//!
//! These values define the deterministic math for bounty generation and
//! payouts. Runtime-adjustable knobs live in [`crate::registry::RegistryConfig`].

use std::time::Duration;

// Logging targets ----------------------------------------------------------
pub(crate) const LOG_SCHEDULER: &str = "bountyboard::scheduler";
pub(crate) const LOG_REGISTRY: &str = "bountyboard::registry";
pub(crate) const LOG_CONFIG: &str = "bountyboard::config";

// Bounty economy -----------------------------------------------------------
/// Credits granted to a bounty's reward pool per system on its route.
pub const BPOINTS_TO_CREDITS_RATIO: f64 = 1000.0;
/// Default cap on concurrently listed bounties per faction.
pub const MAX_BOUNTIES_PER_FACTION: usize = 5;

// Lifecycle timing ---------------------------------------------------------
/// Soft deadline, in seconds, added to a bounty's issue time for every system on its route.
pub const ROUTE_HOP_SECS: i64 = 60 * 60 * 24;
/// Delay between a bounty escaping and its respawn task firing.
pub const DEFAULT_RESPAWN_DELAY: Duration = Duration::from_secs(60 * 60 * 4);

// Generation guards --------------------------------------------------------
/// Upper bound on random re-rolls before generation gives up.
pub(crate) const MAX_GENERATION_ATTEMPTS: usize = 512;

// Presentation defaults ----------------------------------------------------
/// Icon used for custom (non built-in) criminals.
pub const ROCKET_ICON: &str =
    "https://emojipedia-us.s3.dualstack.us-west-1.amazonaws.com/thumbs/120/twitter/259/rocket_1f680.png";
