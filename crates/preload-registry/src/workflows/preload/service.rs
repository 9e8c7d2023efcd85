use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cache::StateCache;
use super::domain::{parent_domain, DomainState, Issue, Issues, PreloadStatus};
use super::machine::{on_remove, on_submit, RemovalDecision, SubmitDecision};
use super::reconcile::{ReconcilePlan, UpdateError};
use super::repository::{DomainStore, ProgressSink, StoreError};
use super::scanner::EligibilityScanner;
use super::source::PreloadListSource;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Tunables for [`PreloadRegistry`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySettings {
    /// Zero disables read caching.
    pub cache_duration: Duration,
    pub debug_endpoints: bool,
}

/// Infrastructure failures surfaced to HTTP callers as a 500.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("could not get current domain status. ({0})")]
    Lookup(#[source] StoreError),
    #[error("could not retrieve status. ({0})")]
    Status(#[source] StoreError),
    #[error("could not retrieve {what} list. ({source})")]
    List {
        what: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("could not get domain states. ({0})")]
    AllStates(#[source] StoreError),
}

/// A record as reported by `/status`, with ancestor coverage resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatusView {
    #[serde(flatten)]
    pub state: DomainState,
    pub bulk: bool,
    /// The domain whose list entry covers this one, when preloaded.
    #[serde(rename = "preloadedDomain", default, skip_serializing_if = "Option::is_none")]
    pub preloaded_domain: Option<String>,
}

/// Submission, status, and reconciliation over a [`DomainStore`].
pub struct PreloadRegistry<S, C, L> {
    store: Arc<S>,
    scanner: Arc<C>,
    source: Arc<L>,
    cache: StateCache,
    clock: Clock,
    debug_endpoints: bool,
}

impl<S, C, L> PreloadRegistry<S, C, L>
where
    S: DomainStore,
    C: EligibilityScanner,
    L: PreloadListSource,
{
    pub fn new(store: Arc<S>, scanner: Arc<C>, source: Arc<L>, settings: RegistrySettings) -> Self {
        Self {
            store,
            scanner,
            source,
            cache: StateCache::new(settings.cache_duration),
            clock: Arc::new(Utc::now),
            debug_endpoints: settings.debug_endpoints,
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn debug_endpoints(&self) -> bool {
        self.debug_endpoints
    }

    pub async fn check_connection(&self) -> Result<(), StoreError> {
        self.store.check_connection().await
    }

    async fn cached_state(&self, domain: &str) -> Result<DomainState, StoreError> {
        if let Some(hit) = self.cache.state_for_domain(domain) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let state = self.store.state_for_domain(domain).await?;
        self.cache.store_state_for_domain(generation, state.clone());
        Ok(state)
    }

    async fn cached_states(&self, status: PreloadStatus) -> Result<Vec<DomainState>, StoreError> {
        if let Some(hit) = self.cache.states_with_status(status) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let states = self.store.states_with_status(status).await?;
        self.cache
            .store_states_with_status(generation, status, states.clone());
        Ok(states)
    }

    async fn persist(&self, state: DomainState) -> Result<(), StoreError> {
        let result = self.store.put_state(state).await;
        self.cache.invalidate();
        result
    }

    pub async fn preloadable(&self, domain: &str) -> Issues {
        self.scanner.preloadable(domain).await
    }

    /// Runs the eligibility check and, when it passes, moves the domain to
    /// `Pending`. Decisions the state machine refuses come back as warnings.
    pub async fn submit(&self, domain: &str) -> Result<Issues, RegistryError> {
        let mut issues = self.scanner.preloadable(domain).await;

        if issues.has_errors() {
            match self.store.state_for_domain(domain).await {
                Ok(current) => {
                    if let SubmitDecision::AlreadyListed(issue) =
                        on_submit(&current, false, (self.clock)())
                    {
                        issues.push_warning(issue);
                    }
                }
                Err(err) => {
                    warn!(domain, error = %err, "could not read state for ineligible submission")
                }
            }
            return Ok(issues);
        }

        let current = self
            .store
            .state_for_domain(domain)
            .await
            .map_err(RegistryError::Lookup)?;

        match on_submit(&current, true, (self.clock)()) {
            SubmitDecision::Accept(next) => {
                if let Err(err) = self.persist(next).await {
                    warn!(domain, error = %err, "saving pending submission failed");
                    issues.push_error(Issue::new(
                        "internal.server.preload.save_failed",
                        "Internal error",
                        "Unable to save to the pending list.",
                    ));
                } else {
                    info!(domain, "domain submitted");
                }
            }
            SubmitDecision::AlreadyListed(issue) => issues.push_warning(issue),
            SubmitDecision::Reject => {}
        }

        Ok(issues)
    }

    pub async fn remove(&self, domain: &str) -> Result<Issues, RegistryError> {
        let mut issues = self.scanner.removable(domain).await;
        if issues.has_errors() {
            return Ok(issues);
        }

        let current = self
            .store
            .state_for_domain(domain)
            .await
            .map_err(RegistryError::Lookup)?;

        match on_remove(&current, (self.clock)()) {
            RemovalDecision::Accept(next) => {
                if let Err(err) = self.persist(next).await {
                    warn!(domain, error = %err, "saving removal request failed");
                    issues.push_error(Issue::new(
                        "internal.server.remove.removal_failed",
                        "Internal error",
                        "Unable to remove from the preload list.",
                    ));
                } else {
                    info!(domain, "removal requested");
                }
            }
            RemovalDecision::Unneeded(issue) => issues.push_warning(issue),
            RemovalDecision::Refuse(issue) => issues.push_error(issue),
        }

        Ok(issues)
    }

    /// Reports whether removal is possible without changing anything.
    pub async fn removable(&self, domain: &str) -> Result<Issues, RegistryError> {
        let view = self.status(domain).await?;

        if view.state.status == PreloadStatus::Preloaded {
            if let Some(ancestor) = view.preloaded_domain.as_deref().filter(|d| *d != domain) {
                let issue = if parent_domain(ancestor).is_some() {
                    Issue::new(
                        "server.removable.subdomain",
                        "Domain is subdomain of preloaded domain",
                        format!(
                            "This domain is a subdomain of {ancestor}, which is on the preload list. To remove the HSTS policy for {domain}, the domain {ancestor} would need to be removed from the preload list."
                        ),
                    )
                } else {
                    Issue::new(
                        "server.removable.preloaded_tld",
                        "Domain is registered under a preloaded TLD",
                        format!(
                            "The entire TLD {ancestor} is preloaded for HSTS and individual domain names cannot be removed."
                        ),
                    )
                };
                return Ok(Issues::with_error(issue));
            }
        }

        let mut issues = self.scanner.removable(domain).await;
        if view.state.is_protected() {
            issues.push_error(Issue::new(
                "server.removable.protected",
                "Domain protected",
                "This domain is currently protected against removal through this service. Please contact the list maintainers if you want to remove it from the preload list.",
            ));
        }
        Ok(issues)
    }

    /// An `unknown` domain inherits `preloaded` from the nearest ancestor
    /// that is preloaded with subdomains included.
    pub async fn status(&self, domain: &str) -> Result<DomainStatusView, RegistryError> {
        let mut state = self.cached_state(domain).await.map_err(RegistryError::Status)?;
        let mut preloaded_domain = domain.to_string();

        if state.status == PreloadStatus::Unknown {
            let mut ancestor = parent_domain(domain);
            while let Some(candidate) = ancestor {
                match self.cached_state(candidate).await {
                    Ok(found)
                        if found.status == PreloadStatus::Preloaded && found.include_sub_domains =>
                    {
                        state.status = PreloadStatus::Preloaded;
                        preloaded_domain = candidate.to_string();
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(domain, ancestor = candidate, error = %err, "ancestor lookup failed"),
                }
                ancestor = parent_domain(candidate);
            }
        }

        state.name = domain.to_string();
        let bulk = state.is_bulk();
        let preloaded_domain =
            (state.status == PreloadStatus::Preloaded).then_some(preloaded_domain);
        Ok(DomainStatusView {
            state,
            bulk,
            preloaded_domain,
        })
    }

    pub async fn pending(&self) -> Result<Vec<DomainState>, RegistryError> {
        self.cached_states(PreloadStatus::Pending)
            .await
            .map_err(|source| RegistryError::List {
                what: "pending",
                source,
            })
    }

    pub async fn pending_removal(&self) -> Result<Vec<String>, RegistryError> {
        self.cached_names(PreloadStatus::PendingRemoval, "pending removal")
            .await
    }

    pub async fn pending_automated_removal(&self) -> Result<Vec<String>, RegistryError> {
        self.cached_names(
            PreloadStatus::PendingAutomatedRemoval,
            "pending automated removal",
        )
        .await
    }

    async fn cached_names(
        &self,
        status: PreloadStatus,
        what: &'static str,
    ) -> Result<Vec<String>, RegistryError> {
        let states = self
            .cached_states(status)
            .await
            .map_err(|source| RegistryError::List { what, source })?;
        Ok(states.into_iter().map(|state| state.name).collect())
    }

    /// Fetches the snapshot and the tracked records and computes the writes.
    pub async fn plan_update(&self) -> Result<ReconcilePlan, UpdateError> {
        let started = Instant::now();
        let list = self.source.latest().await.map_err(UpdateError::List)?;
        info!(
            entries = list.entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched preload list"
        );

        let started = Instant::now();
        let preloaded = self
            .store
            .states_with_status(PreloadStatus::Preloaded)
            .await
            .map_err(|source| UpdateError::Read {
                what: "preloaded",
                source,
            })?;
        let pending_removal = self
            .store
            .states_with_status(PreloadStatus::PendingRemoval)
            .await
            .map_err(|source| UpdateError::Read {
                what: "pending removal",
                source,
            })?;
        let pending_automated_removal = self
            .store
            .states_with_status(PreloadStatus::PendingAutomatedRemoval)
            .await
            .map_err(|source| UpdateError::Read {
                what: "pending automated removal",
                source,
            })?;
        info!(
            preloaded = preloaded.len(),
            pending_removal = pending_removal.len(),
            pending_automated_removal = pending_automated_removal.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded tracked domain states"
        );

        Ok(ReconcilePlan::build(
            &list,
            &preloaded,
            &pending_removal,
            &pending_automated_removal,
        ))
    }

    pub async fn apply_update(
        &self,
        plan: &ReconcilePlan,
        progress: &mut ProgressSink<'_>,
    ) -> Result<usize, UpdateError> {
        let result = plan.apply(self.store.as_ref(), progress).await;
        self.cache.invalidate();
        match &result {
            Ok(written) => info!(written, "reconciliation finished"),
            Err(err) => warn!(error = %err, "reconciliation failed"),
        }
        result
    }

    /// Full reconciliation: plan, summarize, then write.
    pub async fn update(&self, progress: &mut ProgressSink<'_>) -> Result<usize, UpdateError> {
        let plan = self.plan_update().await?;
        plan.write_summary(progress);
        self.apply_update(&plan, progress).await
    }

    pub async fn all_states(&self) -> Result<Vec<DomainState>, RegistryError> {
        self.store
            .all_domain_states()
            .await
            .map_err(RegistryError::AllStates)
    }

    /// Marks a domain preloaded without any checks.
    pub async fn set_preloaded(&self, domain: &str) -> Issues {
        let state = DomainState {
            name: domain.to_string(),
            status: PreloadStatus::Preloaded,
            ..DomainState::default()
        };
        match self.persist(state).await {
            Ok(()) => Issues::default(),
            Err(err) => {
                warn!(domain, error = %err, "forcing preloaded state failed");
                Issues::with_error(Issue::new(
                    "internal.server.debug.set_preloaded_failed",
                    "Internal error",
                    "Unable to save to set as preloaded.",
                ))
            }
        }
    }
}
