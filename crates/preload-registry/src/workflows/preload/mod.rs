//! HSTS preload registry: domain records, their lifecycle, and the HTTP
//! surface that drives it.
//!
//! Records live behind [`DomainStore`]. Submissions and removal requests move
//! them through the lifecycle in [`machine`]; reconciliation against the
//! upstream list is planned in [`reconcile`] and written in bounded batches.

pub(crate) mod cache;
pub mod domain;
pub mod machine;
pub mod reconcile;
pub mod repository;
pub mod router;
pub mod scanner;
pub mod service;
pub mod source;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use domain::{
    match_wanted, normalize_domain, parent_domain, DomainNameError, DomainState, Issue, Issues,
    PolicyType, PreloadEntry, PreloadList, PreloadMode, PreloadStatus, WantedMismatch,
};
pub use reconcile::{ReconcilePlan, UpdateError};
pub use repository::{
    discard_progress, write_in_batches, DomainStore, MemoryDomainStore, ProgressSink, StoreError,
    BATCH_SIZE, OPERATION_TIMEOUT,
};
pub use router::registry_router;
pub use scanner::{EligibilityScanner, HeaderScanner};
pub use service::{DomainStatusView, PreloadRegistry, RegistryError, RegistrySettings};
pub use source::{
    ChromiumPreloadList, PreloadListError, PreloadListSource, CHROMIUM_PRELOAD_LIST_URL,
    FETCH_TIMEOUT,
};
pub use sqlite::SqliteDomainStore;
