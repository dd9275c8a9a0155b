//! Shared constants used across the application.

/// User agent string sent to CMS sites and the text engine.
pub const DISTRIBUTOR_USER_AGENT: &str = "article-distributor/0.1";

/// Shortest pause between two publish drain cycles, in minutes.
pub const PUBLISH_MIN_INTERVAL_MINUTES: u64 = 60;

/// Exclusive upper bound of the pause between publish drain cycles, in minutes.
///
/// Also the staleness threshold for the catch-up cycle run on startup.
pub const PUBLISH_MAX_INTERVAL_MINUTES: u64 = 1668;

/// Shortest pause between two comment passes, in minutes.
pub const COMMENT_MIN_INTERVAL_MINUTES: u64 = 30;

/// Exclusive upper bound of the pause between comment passes, in minutes.
pub const COMMENT_MAX_INTERVAL_MINUTES: u64 = 60;
