//! Bounded-time execution for remote calls.
//!
//! Every call that must not hang (presence writes, first reads, profile
//! prefetch) goes through [`with_deadline`] or [`best_effort`] so the timeout
//! policy lives in one place.

use crate::core::SyncError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Runs `fut` with an upper bound. Elapsing maps to `ErrorKind::Timeout`.
pub async fn with_deadline<T, F>(label: &'static str, limit: Duration, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::timeout("Operation timed out")
            .with_details(format!("{label} after {}ms", limit.as_millis()))),
    }
}

/// Same as [`with_deadline`] but failures are logged and swallowed.
pub async fn best_effort<T, F>(label: &'static str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match with_deadline(label, limit, fut).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation = label, error = %e, "Best-effort operation failed, continuing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn slow_future_times_out() {
        let result: Result<(), SyncError> = with_deadline("slow", Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn best_effort_swallows_errors() {
        let value = best_effort("failing", Duration::from_secs(1), async {
            Err::<u8, _>(SyncError::transient("boom"))
        })
        .await;
        assert!(value.is_none());

        let value = best_effort("ok", Duration::from_secs(1), async { Ok(7u8) }).await;
        assert_eq!(value, Some(7));
    }
}
