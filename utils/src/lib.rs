use std::{
    fmt::Display,
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::warn;

pub fn get_epoch_time_in_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Seconds since the epoch at which something created now with the given
/// time to live stops being valid.
pub fn expiry_from_now(ttl: Duration) -> u64 {
    get_epoch_time_in_secs().saturating_add(ttl.as_secs())
}

/// Runs `op` over `items` in consecutive chunks of at most `chunk_size`
/// elements, stopping at the first error.
///
/// Used to keep argument lists handed to external tools below the command
/// line length limit.
pub async fn for_each_chunk<'a, T, E, F, Fut>(
    items: &'a [T],
    chunk_size: usize,
    mut op: F,
) -> Result<(), E>
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    for chunk in items.chunks(chunk_size.max(1)) {
        op(chunk).await?;
    }
    Ok(())
}

/// Awaits a side effect whose failure must never replace an error the caller
/// is already handling. Failures are logged and dropped.
pub async fn best_effort<F, E>(what: &str, side_effect: F)
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    if let Err(err) = side_effect.await {
        warn!(error = %err, "best-effort {} failed", what);
    }
}
