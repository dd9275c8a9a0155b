//! Random draws that pace the publish scheduler.

use std::time::Duration;

use rand::Rng;

use crate::constants::{PUBLISH_MAX_INTERVAL_MINUTES, PUBLISH_MIN_INTERVAL_MINUTES};

/// Pause before the next drain cycle, uniform in [60, 1668) minutes.
#[must_use]
pub fn random_time() -> Duration {
    let minutes =
        rand::thread_rng().gen_range(PUBLISH_MIN_INTERVAL_MINUTES..PUBLISH_MAX_INTERVAL_MINUTES);
    Duration::from_secs(minutes * 60)
}

/// Uniform integer in [0, 100).
#[must_use]
pub fn random_num() -> u32 {
    rand::thread_rng().gen_range(0..100)
}

/// Credits to inject into a site without demand: 1 with probability one half.
#[must_use]
pub fn demand_draw() -> i64 {
    i64::from(random_num() / 10 >= 5)
}
