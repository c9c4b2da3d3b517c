pub mod consumer;
pub mod engine;

use std::sync::Arc;

pub use consumer::{AbortLatch, ResultConsumer, WorkloadRun};
pub use engine::{EngineError, TaskEngine};

use crate::models::CoreError;
use crate::persistence::BenchmarkStore;

/// Runs a synchronous store operation on the blocking pool so a slow write
/// never stalls the tasks sharing the runtime.
pub(crate) async fn with_store<T, F>(
    store: &Arc<dyn BenchmarkStore>,
    operation: F,
) -> Result<T, CoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn BenchmarkStore) -> Result<T, CoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || operation(store.as_ref()))
        .await
        .map_err(|join_error| {
            CoreError::internal(format!("store call join failure: {join_error}"))
        })?
}
