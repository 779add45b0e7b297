//! Task supervision and store call budget.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, time::Duration};

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::domain::StoreError;

/// Budget of one store operation, retry included
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn a long-running task whose panic is caught and logged instead of
/// tearing the process down.
///
/// Tasks that own a client scope hold a `CancellationToken::drop_guard`, so
/// the scope is cancelled while the panic unwinds.
pub fn spawn_supervised<F>(name: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
            tracing::error!(task = name, "Task panicked: {}", panic_message(panic.as_ref()));
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a store operation within `STORE_TIMEOUT`, retrying once on a
/// transient failure.
pub async fn store_call<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(STORE_TIMEOUT, async {
        match op().await {
            Err(e) if e.is_transient() => {
                tracing::warn!("Transient store failure, retrying once: {}", e);
                op().await
            }
            result => result,
        }
    })
    .await
    .map_err(|_| StoreError::Timeout)?
}
