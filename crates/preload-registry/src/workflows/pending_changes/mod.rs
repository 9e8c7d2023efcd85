//! Offline tool core: pulls the registry's pending changes, re-checks them,
//! and applies the survivors to a checkout of the upstream list file.

pub mod fetch;
pub mod filter;
pub mod list_file;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::workflows::preload::{EligibilityScanner, PolicyType};

pub use fetch::PendingChangesClient;
pub use filter::{filter_parallel, FILTER_PARALLELISM, PROGRESS_INTERVAL};
pub use list_file::{rewrite_list_file, update_list, DupeTracker, UpdatedList, BULK_END_SENTINEL};

#[derive(Debug, thiserror::Error)]
pub enum PendingChangesError {
    #[error("fetching {what} failed: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("decoding {what} failed: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid list pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("could not parse list entry {line:?}: {source}")]
    Entry {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("list file io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Additions and removals waiting to be rolled into the upstream list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pending_additions: Vec<String>,
    pending_removals: Vec<String>,
    pending_automated_removals: Vec<String>,
    removals: HashSet<String>,
}

impl PendingChanges {
    pub fn new(
        mut pending_additions: Vec<String>,
        pending_removals: Vec<String>,
        pending_automated_removals: Vec<String>,
    ) -> Self {
        pending_additions.sort();
        let mut changes = Self {
            pending_additions,
            pending_removals,
            pending_automated_removals,
            removals: HashSet::new(),
        };
        changes.update_removals();
        changes
    }

    fn update_removals(&mut self) {
        self.removals = self
            .pending_removals
            .iter()
            .chain(&self.pending_automated_removals)
            .cloned()
            .collect();
    }

    /// Sorted names waiting to be added.
    pub fn pending_additions(&self) -> &[String] {
        &self.pending_additions
    }

    pub fn pending_automated_removals(&self) -> &[String] {
        &self.pending_automated_removals
    }

    pub fn removes(&self, domain: &str) -> bool {
        self.removals.contains(domain)
    }

    /// Keeps only the changes that still hold.
    ///
    /// Additions must still pass the one-year policy. Automated removals are
    /// kept while the domain keeps failing; the 18-week policy is used because
    /// the original policy of the entry is not published. Operator-requested
    /// removals are never re-checked.
    pub async fn filter<C>(&mut self, scanner: Arc<C>)
    where
        C: EligibilityScanner + 'static,
    {
        info!(count = self.pending_additions.len(), "verifying pending additions");
        let additions_scanner = Arc::clone(&scanner);
        self.pending_additions = filter_parallel(
            std::mem::take(&mut self.pending_additions),
            move |domain| {
                let scanner = Arc::clone(&additions_scanner);
                async move {
                    let issues = scanner.eligible(&domain, &PolicyType::Bulk1Year).await;
                    !issues.has_errors()
                }
            },
        )
        .await;

        info!(
            count = self.pending_automated_removals.len(),
            "verifying pending automated removals"
        );
        self.pending_automated_removals = filter_parallel(
            std::mem::take(&mut self.pending_automated_removals),
            move |domain| {
                let scanner = Arc::clone(&scanner);
                async move {
                    let issues = scanner.eligible(&domain, &PolicyType::Bulk18Weeks).await;
                    issues.has_errors()
                }
            },
        )
        .await;

        info!("done verifying domains");
        self.update_removals();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::preload::{Issue, Issues};
    use async_trait::async_trait;

    #[derive(Default)]
    struct PolicyScanner {
        failing: HashSet<(String, &'static str)>,
    }

    impl PolicyScanner {
        fn fails(mut self, domain: &str, policy: &PolicyType) -> Self {
            self.failing
                .insert((domain.to_string(), static_policy(policy)));
            self
        }
    }

    fn static_policy(policy: &PolicyType) -> &'static str {
        match policy {
            PolicyType::Bulk18Weeks => "bulk-18-weeks",
            _ => "bulk-1-year",
        }
    }

    #[async_trait]
    impl EligibilityScanner for PolicyScanner {
        async fn eligible(&self, domain: &str, policy: &PolicyType) -> Issues {
            if self
                .failing
                .contains(&(domain.to_string(), static_policy(policy)))
            {
                Issues::with_error(Issue::new("response.no_header", "No HSTS header", "none"))
            } else {
                Issues::default()
            }
        }

        async fn removable(&self, _domain: &str) -> Issues {
            Issues::default()
        }
    }

    #[test]
    fn removals_cover_manual_and_automated_requests() {
        let changes = PendingChanges::new(
            vec!["b.test".into(), "a.test".into()],
            vec!["manual.test".into()],
            vec!["auto.test".into()],
        );
        assert_eq!(changes.pending_additions(), ["a.test", "b.test"]);
        assert!(changes.removes("manual.test"));
        assert!(changes.removes("auto.test"));
        assert!(!changes.removes("a.test"));
    }

    #[tokio::test]
    async fn filter_keeps_only_changes_that_still_hold() {
        let scanner = PolicyScanner::default()
            .fails("broken.test", &PolicyType::Bulk1Year)
            .fails("still-broken.test", &PolicyType::Bulk18Weeks);
        let mut changes = PendingChanges::new(
            vec!["ok.test".into(), "broken.test".into()],
            vec!["manual.test".into()],
            vec!["still-broken.test".into(), "fixed.test".into()],
        );

        changes.filter(Arc::new(scanner)).await;

        assert_eq!(changes.pending_additions(), ["ok.test"]);
        assert_eq!(changes.pending_automated_removals(), ["still-broken.test"]);
        assert!(changes.removes("manual.test"));
        assert!(changes.removes("still-broken.test"));
        assert!(!changes.removes("fixed.test"));
    }
}
