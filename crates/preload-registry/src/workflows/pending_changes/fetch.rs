use serde::de::DeserializeOwned;
use tracing::info;

use super::{PendingChanges, PendingChangesError};
use crate::workflows::preload::{PreloadEntry, FETCH_TIMEOUT};

/// Reads the pending lists published by a running registry.
#[derive(Debug, Clone)]
pub struct PendingChangesClient {
    http: reqwest::Client,
    base_url: String,
}

impl PendingChangesClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Fetches the three lists concurrently; any failure fails the whole fetch.
    pub async fn fetch(&self) -> Result<PendingChanges, PendingChangesError> {
        let (additions, removals, automated) = tokio::try_join!(
            self.fetch_json::<Vec<PreloadEntry>>("pending", "pending additions"),
            self.fetch_json::<Vec<String>>("pending-removal", "pending removals"),
            self.fetch_json::<Vec<String>>(
                "pending-automated-removal",
                "pending automated removals"
            ),
        )?;
        info!(
            additions = additions.len(),
            removals = removals.len(),
            automated_removals = automated.len(),
            "all fetches complete"
        );

        Ok(PendingChanges::new(
            additions.into_iter().map(|entry| entry.name).collect(),
            removals,
            automated,
        ))
    }

    async fn fetch_json<T>(&self, path: &str, what: &'static str) -> Result<T, PendingChangesError>
    where
        T: DeserializeOwned,
    {
        info!(what, "fetching");
        let body = self
            .http
            .get(self.endpoint(path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| PendingChangesError::Fetch { what, source })?
            .text()
            .await
            .map_err(|source| PendingChangesError::Fetch { what, source })?;
        decode(&body, what)
    }
}

pub(crate) fn decode<T>(body: &str, what: &'static str) -> Result<T, PendingChangesError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(body).map_err(|source| PendingChangesError::Decode { what, source })
}
