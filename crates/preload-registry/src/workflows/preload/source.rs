use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::domain::PreloadList;

/// Chromium's copy of the list, served base64-encoded by gitiles.
pub const CHROMIUM_PRELOAD_LIST_URL: &str = "https://chromium.googlesource.com/chromium/src/+/main/net/http/transport_security_state_static.json?format=TEXT";

/// Deadline for every outbound request the registry and its tools make.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum PreloadListError {
    #[error("fetching the preload list failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("the preload list is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("the preload list is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("the preload list is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Supplies the current upstream snapshot.
#[async_trait]
pub trait PreloadListSource: Send + Sync {
    async fn latest(&self) -> Result<PreloadList, PreloadListError>;
}

#[derive(Debug, Clone)]
pub struct ChromiumPreloadList {
    http: reqwest::Client,
    url: String,
}

impl ChromiumPreloadList {
    pub fn new(url: impl Into<String>) -> Result<Self, PreloadListError> {
        let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

/// Decodes the `?format=TEXT` body: base64 around JSON with `//` comments.
pub fn decode_list_body(body: &str) -> Result<PreloadList, PreloadListError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let raw = STANDARD.decode(compact)?;
    let text = String::from_utf8(raw)?;
    Ok(PreloadList::parse(&text)?)
}

#[async_trait]
impl PreloadListSource for ChromiumPreloadList {
    async fn latest(&self) -> Result<PreloadList, PreloadListError> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        decode_list_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::preload::domain::PolicyType;

    #[test]
    fn decodes_wrapped_base64_bodies() {
        let json = "// header comment\n{ \"entries\": [\n  { \"name\": \"example.com\", \"policy\": \"bulk-18-weeks\", \"mode\": \"force-https\", \"include_subdomains\": true }\n] }\n";
        let encoded = STANDARD.encode(json);
        let (head, tail) = encoded.split_at(20);
        let body = format!("{head}\n{tail}\n");

        let list = decode_list_body(&body).expect("body decodes");
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].policy, PolicyType::Bulk18Weeks);
    }

    #[test]
    fn reports_bad_encoding() {
        match decode_list_body("!!not base64!!") {
            Err(PreloadListError::Decode(_)) => {}
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn outbound_requests_share_a_fifteen_second_deadline() {
        assert_eq!(FETCH_TIMEOUT, Duration::from_secs(15));
    }
}
