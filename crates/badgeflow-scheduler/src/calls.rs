//! Bounded external calls.

use std::future::Future;
use std::time::Duration;

use badgeflow_core::error::{AutomationError, Result};

/// Run `fut`, turning an elapsed deadline into `AutomationError::Timeout`.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AutomationError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// `err: cause: cause` for logging.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}
