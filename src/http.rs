use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9411";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin wrapper over reqwest bound to one Zipkin-compatible base URL.
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zlens/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET a path under the base URL and deserialize the JSON body.
    /// Non-2xx responses become errors carrying the status and a body
    /// snippet so the caller can surface something actionable.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response from {url}"))?;
        if !status.is_success() {
            let snippet = body_snippet(&body);
            if snippet.is_empty() {
                bail!("{url} returned {status}");
            }
            bail!("{url} returned {status}: {snippet}");
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response from {url}"))
    }

    /// POST a JSON body to an absolute URL and hand back the raw status;
    /// callers decide which statuses count as success.
    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<StatusCode> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        Ok(response.status())
    }
}

fn body_snippet(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(MAX_CHARS).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::{json, Value};

    #[test]
    fn endpoint_joins_with_single_slash() {
        let client = ApiClient::new("http://localhost:9411/").expect("client");
        assert_eq!(client.base_url(), "http://localhost:9411");
        assert_eq!(
            client.endpoint("/api/v2/trace/abc"),
            "http://localhost:9411/api/v2/trace/abc"
        );
        assert_eq!(
            client.endpoint("api/v2/trace/abc"),
            "http://localhost:9411/api/v2/trace/abc"
        );
    }

    #[test]
    fn long_bodies_are_snipped_for_errors() {
        assert_eq!(body_snippet("  boom  "), "boom");
        let long = "x".repeat(500);
        let snippet = body_snippet(&long);
        assert_eq!(snippet.chars().count(), 201);
        assert!(snippet.ends_with('…'));
    }

    #[tokio::test]
    async fn get_json_deserializes_success_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/trace/abc");
                then.status(200)
                    .json_body(json!([{"traceId": "t", "id": "abc"}]));
            })
            .await;

        let client = ApiClient::new(&server.base_url()).expect("client");
        let body: Value = client.get_json("api/v2/trace/abc").await.expect("fetch");

        mock.assert_async().await;
        assert_eq!(body[0]["id"], "abc");
    }

    #[tokio::test]
    async fn get_json_surfaces_status_and_body_on_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/trace/abc");
                then.status(500).body("upstream exploded");
            })
            .await;

        let client = ApiClient::new(&server.base_url()).expect("client");
        let err = client
            .get_json::<Value>("api/v2/trace/abc")
            .await
            .expect_err("500 should fail");
        let message = err.to_string();
        assert!(message.contains("500"), "got: {message}");
        assert!(message.contains("upstream exploded"), "got: {message}");
    }

    #[tokio::test]
    async fn post_json_passes_status_through_unjudged() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v2/spans")
                    .json_body(json!([{"id": "a"}]));
                then.status(500);
            })
            .await;

        let client = ApiClient::new(&server.base_url()).expect("client");
        let status = client
            .post_json(&server.url("/api/v2/spans"), &json!([{"id": "a"}]))
            .await
            .expect("request itself succeeds");

        mock.assert_async().await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
