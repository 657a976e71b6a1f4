// ABOUTME: Remote store gateway trait and the blocking HTTP client for the journal relay
// ABOUTME: Handles throttling, bearer auth, bounded timeouts and status-to-error mapping

use crate::model::{RemoteId, RemoteTree, TreeListing};
use crate::util::truncate_str;
use crate::{Error, Result};
use rand::Rng;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The remote journal as seen by the sync engine.
pub trait RemoteStore {
    fn fetch_tree(&self) -> Result<RemoteTree>;

    fn fetch_document_body(&self, id: &RemoteId) -> Result<String>;

    /// Creates a document and returns the id the remote assigned to it.
    fn create_document(&self, parent: Option<&RemoteId>, name: &str, body: &str)
        -> Result<RemoteId>;

    fn update_document(&self, id: &RemoteId, body: &str) -> Result<()>;
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    throttle_min: u64,
    throttle_max: u64,
}

#[derive(Deserialize)]
struct DocumentBody {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Created {
    #[serde(rename = "_id")]
    id: String,
}

impl ApiClient {
    pub fn new(token: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            throttle_min: 100,
            throttle_max: 300,
        })
    }

    pub fn with_throttle(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.throttle_min = min_ms;
        self.throttle_max = max_ms.max(min_ms);
        self
    }

    pub fn disable_throttle(mut self) -> Self {
        self.throttle_min = 0;
        self.throttle_max = 0;
        self
    }

    fn throttle(&self) {
        if self.throttle_max > 0 {
            let sleep_ms = rand::thread_rng().gen_range(self.throttle_min..=self.throttle_max);
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn send<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let body = self.send_raw(endpoint, request)?;
        serde_json::from_str(&body).map_err(|e| {
            debug!(
                endpoint,
                body = %truncate_str(&body, 500),
                "failed to parse relay response"
            );
            Error::Parse(e)
        })
    }

    fn send_raw(&self, endpoint: &str, request: RequestBuilder) -> Result<String> {
        debug!(endpoint, "relay request");
        let response = request
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
            .header("User-Agent", concat!("orgfoundry/", env!("CARGO_PKG_VERSION")))
            .send()?;

        self.throttle();

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(status_error(endpoint, status, &message));
        }

        Ok(response.text()?)
    }
}

fn status_error(endpoint: &str, status: StatusCode, message: &str) -> Error {
    let detail = format!(
        "{} returned {}: {}",
        endpoint,
        status.as_u16(),
        truncate_str(message, 100)
    );
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::RemoteAuth(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::RemoteTimeout(detail),
        _ => Error::RemoteUnavailable(detail),
    }
}

impl RemoteStore for ApiClient {
    fn fetch_tree(&self) -> Result<RemoteTree> {
        let endpoint = "/api/journal/tree";
        let listing: TreeListing = self.send(endpoint, self.client.get(self.url(endpoint)))?;
        debug!(
            folders = listing.folders.len(),
            documents = listing.documents.len(),
            "fetched journal tree"
        );
        listing.into_tree()
    }

    fn fetch_document_body(&self, id: &RemoteId) -> Result<String> {
        let endpoint = format!("/api/journal/documents/{}", id);
        let doc: DocumentBody = self.send(&endpoint, self.client.get(self.url(&endpoint)))?;
        Ok(doc.content.unwrap_or_default())
    }

    fn create_document(
        &self,
        parent: Option<&RemoteId>,
        name: &str,
        body: &str,
    ) -> Result<RemoteId> {
        let endpoint = "/api/journal/documents";
        let payload = json!({
            "name": name,
            "folder": parent.map(RemoteId::as_str),
            "content": body,
        });
        let created: Created =
            self.send(endpoint, self.client.post(self.url(endpoint)).json(&payload))?;
        Ok(RemoteId::new(created.id))
    }

    fn update_document(&self, id: &RemoteId, body: &str) -> Result<()> {
        let endpoint = format!("/api/journal/documents/{}", id);
        let payload = json!({ "content": body });
        self.send_raw(&endpoint, self.client.put(self.url(&endpoint)).json(&payload))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new(
            "test_token".into(),
            "https://foundry.example/".into(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
        .unwrap()
    }

    #[test]
    fn test_api_client_new() {
        let client = client();
        assert_eq!(client.base_url, "https://foundry.example");
        assert_eq!(client.token, "test_token");
        assert_eq!(client.url("/api/journal/tree"), "https://foundry.example/api/journal/tree");
    }

    #[test]
    fn test_api_client_throttle_config() {
        let client = client().with_throttle(50, 150);
        assert_eq!(client.throttle_min, 50);
        assert_eq!(client.throttle_max, 150);

        let inverted = self::client().with_throttle(200, 10);
        assert_eq!(inverted.throttle_max, 200);
    }

    #[test]
    fn test_api_client_disable_throttle() {
        let client = client().disable_throttle();
        assert_eq!(client.throttle_min, 0);
        assert_eq!(client.throttle_max, 0);
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error("/x", StatusCode::UNAUTHORIZED, ""),
            Error::RemoteAuth(_)
        ));
        assert!(matches!(
            status_error("/x", StatusCode::FORBIDDEN, ""),
            Error::RemoteAuth(_)
        ));
        assert!(matches!(
            status_error("/x", StatusCode::GATEWAY_TIMEOUT, ""),
            Error::RemoteTimeout(_)
        ));
        let err = status_error("/x", StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, Error::RemoteUnavailable(_)));
        assert!(err.to_string().contains("500"));
    }
}
