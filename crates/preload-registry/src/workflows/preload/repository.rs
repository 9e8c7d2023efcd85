use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::domain::{DomainState, PreloadStatus};

/// Upper bound on records committed by a single multi-record write.
pub const BATCH_SIZE: usize = 450;

/// Deadline applied to every individual store operation.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives human-readable progress text while a write is in flight.
pub type ProgressSink<'a> = dyn FnMut(fmt::Arguments<'_>) + Send + 'a;

/// Progress sink that drops everything.
pub fn discard_progress(_: fmt::Arguments<'_>) {}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("stored record for {name} is malformed: {detail}")]
    Corrupt { name: String, detail: String },
}

/// Persistence abstraction for per-domain records.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Unseen names come back as an `unknown` record, never as an error.
    async fn state_for_domain(&self, domain: &str) -> Result<DomainState, StoreError>;

    async fn states_with_status(
        &self,
        status: PreloadStatus,
    ) -> Result<Vec<DomainState>, StoreError>;

    async fn all_domain_states(&self) -> Result<Vec<DomainState>, StoreError>;

    /// Commits one chunk of at most [`BATCH_SIZE`] records atomically.
    async fn write_batch(&self, batch: &[DomainState]) -> Result<(), StoreError>;

    async fn check_connection(&self) -> Result<(), StoreError>;

    async fn domains_with_status(&self, status: PreloadStatus) -> Result<Vec<String>, StoreError> {
        let states = self.states_with_status(status).await?;
        Ok(states.into_iter().map(|state| state.name).collect())
    }

    async fn put_states(
        &self,
        updates: &[DomainState],
        progress: &mut ProgressSink<'_>,
    ) -> Result<(), StoreError> {
        write_in_batches(self, updates, progress).await
    }

    async fn put_state(&self, state: DomainState) -> Result<(), StoreError> {
        let mut sink = discard_progress;
        self.put_states(std::slice::from_ref(&state), &mut sink)
            .await
    }
}

/// Splits `updates` into chunks and commits them in order, reporting each
/// chunk as it goes. The first failing chunk stops the run; chunks committed
/// before it stay committed.
pub async fn write_in_batches<S>(
    store: &S,
    updates: &[DomainState],
    progress: &mut ProgressSink<'_>,
) -> Result<(), StoreError>
where
    S: DomainStore + ?Sized,
{
    if updates.is_empty() {
        progress(format_args!("No updates.\n"));
        return Ok(());
    }

    for batch in updates.chunks(BATCH_SIZE) {
        progress(format_args!("Updating {} entries...", batch.len()));
        match with_deadline(store.write_batch(batch)).await.and_then(|result| result) {
            Ok(()) => progress(format_args!(" done.\n")),
            Err(err) => {
                progress(format_args!(" failed.\n"));
                tracing::warn!(error = %err, entries = batch.len(), "batch write failed");
                return Err(err);
            }
        }
    }

    Ok(())
}

/// Bounds `operation` by [`OPERATION_TIMEOUT`].
pub async fn with_deadline<F>(operation: F) -> Result<F::Output, StoreError>
where
    F: Future,
{
    tokio::time::timeout(OPERATION_TIMEOUT, operation)
        .await
        .map_err(|_| StoreError::Timeout(OPERATION_TIMEOUT))
}

/// Map-backed store used by tests and local experiments.
///
/// Failures can be injected either for every call or after a number of
/// successful batch writes.
#[derive(Debug, Default, Clone)]
pub struct MemoryDomainStore {
    states: Arc<Mutex<HashMap<String, DomainState>>>,
    fail_calls: Arc<AtomicBool>,
    failure_budget: Arc<Mutex<Option<usize>>>,
    batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl MemoryDomainStore {
    pub fn with_states(states: impl IntoIterator<Item = DomainState>) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.states.lock() {
            map.extend(states.into_iter().map(|state| (state.name.clone(), state)));
        }
        store
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_fail_calls(&self, fail: bool) {
        self.fail_calls.store(fail, Ordering::SeqCst);
    }

    /// Lets `batches` more batch writes succeed, then fails the rest.
    pub fn fail_writes_after(&self, batches: usize) {
        if let Ok(mut budget) = self.failure_budget.lock() {
            *budget = Some(batches);
        }
    }

    /// Sizes of the batches committed so far, in commit order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }

    /// Every stored record, sorted by name.
    pub fn snapshot(&self) -> Vec<DomainState> {
        let mut states: Vec<DomainState> = self
            .states
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, DomainState>>, StoreError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("forced failure".to_string()));
        }
        self.states
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn consume_write_budget(&self) -> Result<(), StoreError> {
        let mut budget = self
            .failure_budget
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        match budget.as_mut() {
            Some(0) => Err(StoreError::Unavailable("forced failure".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DomainStore for MemoryDomainStore {
    async fn state_for_domain(&self, domain: &str) -> Result<DomainState, StoreError> {
        let states = self.guard()?;
        Ok(states
            .get(domain)
            .cloned()
            .unwrap_or_else(|| DomainState::unknown(domain)))
    }

    async fn states_with_status(
        &self,
        status: PreloadStatus,
    ) -> Result<Vec<DomainState>, StoreError> {
        let states = self.guard()?;
        let mut matching: Vec<DomainState> = states
            .values()
            .filter(|state| state.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matching)
    }

    async fn all_domain_states(&self) -> Result<Vec<DomainState>, StoreError> {
        let states = self.guard()?;
        let mut all: Vec<DomainState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn write_batch(&self, batch: &[DomainState]) -> Result<(), StoreError> {
        let mut states = self.guard()?;
        self.consume_write_budget()?;
        for state in batch {
            states.insert(state.name.clone(), state.clone());
        }
        drop(states);

        self.batch_sizes
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?
            .push(batch.len());
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), StoreError> {
        self.guard().map(|_| ())
    }
}
