//! Helpers shared by the background loops.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `duration`; returns `false` if `shutdown` fires first.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
