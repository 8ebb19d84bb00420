use std::future::Future;
use std::time::Duration;

/// Run one backend call under its timeout, degrading failure to `None`.
///
/// Backend trouble never crosses a retrieval stage: an error or timeout
/// is logged at error level and the caller proceeds with an empty leg.
pub(crate) async fn call<T, F>(backend: &'static str, timeout: Duration, fut: F) -> Option<T>
where
    F: Future<Output = auditctx_backend::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            log::error!("{backend} backend failed: {err}");
            None
        }
        Err(_) => {
            log::error!("{backend} backend timed out after {timeout:?}");
            None
        }
    }
}
