use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::preload::domain::{
    DomainState, Issue, Issues, PolicyType, PreloadEntry, PreloadList, PreloadMode, PreloadStatus,
};
use crate::workflows::preload::repository::MemoryDomainStore;
use crate::workflows::preload::scanner::EligibilityScanner;
use crate::workflows::preload::service::{PreloadRegistry, RegistrySettings};
use crate::workflows::preload::source::{PreloadListError, PreloadListSource};
use crate::workflows::preload::UpdateError;

pub(super) type TestRegistry = PreloadRegistry<MemoryDomainStore, StubScanner, StubList>;

/// Scanner that approves everything unless told otherwise.
#[derive(Default)]
pub(super) struct StubScanner {
    preload_errors: Mutex<HashMap<String, Vec<Issue>>>,
    removal_errors: Mutex<HashMap<String, Vec<Issue>>>,
}

impl StubScanner {
    pub(super) fn reject_preload(&self, domain: &str, code: &str) {
        self.preload_errors
            .lock()
            .expect("scanner mutex poisoned")
            .entry(domain.to_string())
            .or_default()
            .push(Issue::new(code, "Rejected", format!("{domain} was rejected")));
    }

    pub(super) fn reject_removal(&self, domain: &str, code: &str) {
        self.removal_errors
            .lock()
            .expect("scanner mutex poisoned")
            .entry(domain.to_string())
            .or_default()
            .push(Issue::new(code, "Rejected", format!("{domain} was rejected")));
    }
}

#[async_trait]
impl EligibilityScanner for StubScanner {
    async fn eligible(&self, domain: &str, _policy: &PolicyType) -> Issues {
        Issues {
            errors: self
                .preload_errors
                .lock()
                .expect("scanner mutex poisoned")
                .get(domain)
                .cloned()
                .unwrap_or_default(),
            warnings: Vec::new(),
        }
    }

    async fn removable(&self, domain: &str) -> Issues {
        Issues {
            errors: self
                .removal_errors
                .lock()
                .expect("scanner mutex poisoned")
                .get(domain)
                .cloned()
                .unwrap_or_default(),
            warnings: Vec::new(),
        }
    }
}

/// Upstream list served from memory; `None` simulates a fetch failure.
#[derive(Default)]
pub(super) struct StubList {
    list: Mutex<Option<PreloadList>>,
}

impl StubList {
    pub(super) fn with_entries(entries: Vec<PreloadEntry>) -> Self {
        let stub = Self::default();
        stub.set_entries(entries);
        stub
    }

    pub(super) fn failing() -> Self {
        Self::default()
    }

    pub(super) fn set_entries(&self, entries: Vec<PreloadEntry>) {
        *self.list.lock().expect("list mutex poisoned") = Some(PreloadList { entries });
    }
}

#[async_trait]
impl PreloadListSource for StubList {
    async fn latest(&self) -> Result<PreloadList, PreloadListError> {
        match self.list.lock().expect("list mutex poisoned").clone() {
            Some(list) => Ok(list),
            None => Err(PreloadListError::Parse(
                serde_json::from_str::<PreloadList>("<html>unavailable</html>")
                    .expect_err("html is not a preload list"),
            )),
        }
    }
}

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 6, 5, 4, 3, 2)
        .single()
        .expect("valid date")
}

pub(super) fn build_registry(
    store: MemoryDomainStore,
    scanner: StubScanner,
    list: StubList,
) -> Arc<TestRegistry> {
    build_registry_with(store, scanner, list, RegistrySettings::default())
}

pub(super) fn build_registry_with(
    store: MemoryDomainStore,
    scanner: StubScanner,
    list: StubList,
    settings: RegistrySettings,
) -> Arc<TestRegistry> {
    Arc::new(
        PreloadRegistry::new(Arc::new(store), Arc::new(scanner), Arc::new(list), settings)
            .with_clock(fixed_now),
    )
}

pub(super) fn cached_settings() -> RegistrySettings {
    RegistrySettings {
        cache_duration: Duration::from_secs(60),
        debug_endpoints: true,
    }
}

pub(super) fn state(name: &str, status: PreloadStatus) -> DomainState {
    DomainState {
        name: name.to_string(),
        status,
        ..DomainState::default()
    }
}

pub(super) fn entry(name: &str, policy: PolicyType, include_subdomains: bool) -> PreloadEntry {
    PreloadEntry {
        name: name.to_string(),
        policy,
        mode: PreloadMode::ForceHttps,
        include_subdomains,
    }
}

/// Runs a full reconciliation and returns the progress text alongside the result.
pub(super) async fn run_update(registry: &TestRegistry) -> (String, Result<usize, UpdateError>) {
    let mut text = String::new();
    let result = {
        let mut sink = |args: fmt::Arguments<'_>| text.push_str(&args.to_string());
        registry.update(&mut sink).await
    };
    (text, result)
}

pub(super) async fn read_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
