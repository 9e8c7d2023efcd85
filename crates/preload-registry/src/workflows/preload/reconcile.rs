use std::collections::HashSet;
use std::fmt;

use super::domain::{DomainState, PreloadEntry, PreloadList};
use super::machine::{on_reconcile, ReconcileDecision};
use super::repository::{DomainStore, ProgressSink, StoreError};
use super::source::PreloadListError;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("could not retrieve latest preload list. ({0})")]
    List(#[source] PreloadListError),
    #[error("could not retrieve domain names previously marked as {what}. ({source})")]
    Read {
        what: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("datastore update failed. ({source})")]
    Write {
        /// Whether progress text reached the sink before the failure.
        progress_written: bool,
        #[source]
        source: StoreError,
    },
}

/// Records to write for one reconciliation pass, grouped by cause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub list_entries: usize,
    pub preloaded_entries: usize,
    pub added: Vec<DomainState>,
    pub removed: Vec<DomainState>,
    pub self_rejected: Vec<DomainState>,
}

impl ReconcilePlan {
    /// Compares the snapshot with the records currently marked preloaded,
    /// pending removal, and pending automated removal.
    pub fn build(
        list: &PreloadList,
        preloaded: &[DomainState],
        pending_removal: &[DomainState],
        pending_automated_removal: &[DomainState],
    ) -> Self {
        let upstream = list.hsts_index();
        let tracked: Vec<PreloadEntry> = preloaded
            .iter()
            .chain(pending_removal)
            .chain(pending_automated_removal)
            .map(DomainState::to_entry)
            .collect();
        let tracked: HashSet<&str> = tracked.iter().map(|entry| entry.name.as_str()).collect();

        let hsts_entries = list.hsts_entries();
        let mut plan = ReconcilePlan {
            list_entries: list.entries.len(),
            preloaded_entries: hsts_entries.len(),
            ..ReconcilePlan::default()
        };

        for entry in hsts_entries {
            if tracked.contains(entry.name.as_str()) {
                continue;
            }
            let unseen = DomainState::unknown(entry.name.clone());
            if let ReconcileDecision::Transition(next) = on_reconcile(&unseen, Some(entry)) {
                plan.added.push(next);
            }
        }

        for state in preloaded {
            let listed = upstream.get(state.name.as_str()).copied();
            if let ReconcileDecision::Transition(next) = on_reconcile(state, listed) {
                plan.removed.push(next);
            }
        }

        for state in pending_removal {
            let listed = upstream.get(state.name.as_str()).copied();
            if let ReconcileDecision::Transition(next) = on_reconcile(state, listed) {
                plan.self_rejected.push(next);
            }
        }

        plan
    }

    pub fn total_updates(&self) -> usize {
        self.added.len() + self.removed.len() + self.self_rejected.len()
    }

    /// Added records first, then removed, then self-rejected.
    pub fn updates(&self) -> Vec<DomainState> {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.self_rejected)
            .cloned()
            .collect()
    }

    pub fn write_summary(&self, progress: &mut ProgressSink<'_>) {
        progress(format_args!(
            "The preload list has {} entries.\n- # of preloaded HSTS entries: {}\n- # to be added in this update: {}\n- # to be removed this update: {}\n- # to be self-rejected this update: {}\n",
            self.list_entries,
            self.preloaded_entries,
            self.added.len(),
            self.removed.len(),
            self.self_rejected.len(),
        ));
    }

    /// Writes the plan through the batched writer and reports the outcome.
    ///
    /// On failure the error text is appended to the sink when progress has
    /// already been reported; otherwise the caller owns the error response.
    pub async fn apply<S>(
        &self,
        store: &S,
        progress: &mut ProgressSink<'_>,
    ) -> Result<usize, UpdateError>
    where
        S: DomainStore + ?Sized,
    {
        let updates = self.updates();
        let mut progress_written = false;
        let result = {
            let mut tracked = |args: fmt::Arguments<'_>| {
                progress_written = true;
                progress(args);
            };
            store.put_states(&updates, &mut tracked).await
        };

        match result {
            Ok(()) => {
                progress(format_args!(
                    "Success. {} domain states updated.\n",
                    updates.len()
                ));
                Ok(updates.len())
            }
            Err(source) => {
                let err = UpdateError::Write {
                    progress_written,
                    source,
                };
                if progress_written {
                    progress(format_args!("Internal error: {err}\n"));
                }
                Err(err)
            }
        }
    }
}
