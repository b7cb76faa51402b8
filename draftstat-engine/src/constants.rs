//! Centralized constants for the draft-frequency engine.
//!
//! Values that depend on deployment live in [`crate::config::EngineConfig`];
//! the ones here are part of the data contract with the game server and the
//! document layout, and only change together with those.

// Wire contract -------------------------------------------------------------
/// Wildcard id used in map and player-count pools for aggregate matrices.
pub const WILDCARD: i32 = -1;
/// Class code emitted by the game server for broken player logs.
pub const DEFAULT_SENTINEL_CLASS_CODE: i32 = 100;
/// Number of dot-separated segments a patch version must carry.
pub const PATCH_VERSION_SEGMENTS: usize = 3;
/// Zero-based segment of the patch version that identifies the balance patch.
pub const BALANCE_SEGMENT_INDEX: usize = 2;
/// Number of draft rounds carried by one player log.
pub const DRAFT_ROUNDS: usize = 3;

// Document layout -----------------------------------------------------------
/// First batch number of every patch version.
pub const FIRST_BATCH: u32 = 1;
/// Short type tag for coexistence documents.
pub const COEXISTENCE_TAG: &str = "C";
/// Short type tag for transition documents.
pub const TRANSITION_TAG: &str = "T";

// Draft shape defaults ------------------------------------------------------
pub(crate) const DEFAULT_ROUNDS: u32 = 3;
pub(crate) const DEFAULT_PICKS_PER_ROUND: u32 = 3;

// Retry and scheduling defaults ---------------------------------------------
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
pub(crate) const DEFAULT_RETRY_MULTIPLIER: u32 = 2;
pub(crate) const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 60 * 60;
pub(crate) const DEFAULT_RNG_SEED: u64 = 0x5EED_D4AF_7000_0001;
pub(crate) const DEFAULT_ADMIN_TOKEN: &str = "20250320";

// Recommendation tuning -----------------------------------------------------
/// Share of an upgrade card's frequency folded into its reinforce card.
pub(crate) const UPGRADE_WEIGHT_NUMERATOR: u64 = 3;
pub(crate) const UPGRADE_WEIGHT_DENOMINATOR: u64 = 10;

// RNG stream tags -------------------------------------------------------------
pub(crate) const TRANSITION_STREAM_TAG: &[u8] = b"transition-direction";
