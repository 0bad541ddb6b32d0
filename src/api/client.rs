use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::{ApiErrorBody, Bookmark, Issue, NewBookmark};
use crate::cache::{CacheKey, Fetcher, FetchError, RequestToken, SharedFetcher};
use crate::keys::{IssueFilters, Resource};

/// HTTP client for the issue API.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
}

impl ApiClient {
  pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;
    // Relative joins must append to the base path, not replace its last segment
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let mut headers = HeaderMap::new();
    if let Some(token) = token {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      value.set_sensitive(true);
      headers.insert(AUTHORIZATION, value);
    }

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(timeout)
      .user_agent(concat!("issuedeck/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  /// This client as a cache fetcher.
  pub fn fetcher(&self) -> SharedFetcher {
    Arc::new(self.clone())
  }

  fn url(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base
      .join(path)
      .map_err(|e| FetchError::Rejected(format!("Invalid request path {}: {}", path, e)))
  }

  pub async fn list_issues(&self, filters: &IssueFilters) -> Result<Vec<Issue>, FetchError> {
    let mut url = self.url("issues")?;
    let pairs = filters.query_pairs();
    if !pairs.is_empty() {
      url.query_pairs_mut().extend_pairs(pairs);
    }
    self.send_json(self.http.get(url)).await
  }

  pub async fn get_issue(&self, id: i64) -> Result<Issue, FetchError> {
    let url = self.url(&format!("issues/{}", id))?;
    self.send_json(self.http.get(url)).await
  }

  pub async fn list_bookmarks(&self) -> Result<Vec<Bookmark>, FetchError> {
    let url = self.url("bookmarks")?;
    self.send_json(self.http.get(url)).await
  }

  pub async fn add_bookmark(&self, issue_id: i64) -> Result<Bookmark, FetchError> {
    let url = self.url("bookmarks")?;
    self
      .send_json(self.http.post(url).json(&NewBookmark { issue_id }))
      .await
  }

  pub async fn remove_bookmark(&self, issue_id: i64) -> Result<(), FetchError> {
    let url = self.url(&format!("bookmarks/{}", issue_id))?;
    self.send(self.http.delete(url)).await.map(|_| ())
  }

  /// Fetch `resource` as raw JSON, validated against its expected shape.
  pub async fn load(&self, resource: &Resource) -> Result<Value, FetchError> {
    let value = match resource {
      Resource::IssueList(filters) => serde_json::to_value(self.list_issues(filters).await?)?,
      Resource::IssueDetail { id } => serde_json::to_value(self.get_issue(*id).await?)?,
      Resource::Bookmarks => serde_json::to_value(self.list_bookmarks().await?)?,
    };
    Ok(value)
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, FetchError> {
    let body = self.send(request).await?;
    Ok(serde_json::from_slice(&body)?)
  }

  async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>, FetchError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    debug!(url = %response.url(), status = status.as_u16(), "API response");

    let body = response.bytes().await.map_err(transport_error)?;
    if status.is_success() {
      Ok(body.to_vec())
    } else {
      Err(status_error(status, &body))
    }
  }
}

impl Fetcher for ApiClient {
  fn fetch(&self, key: &CacheKey, token: RequestToken) -> BoxFuture<'static, Result<Value, FetchError>> {
    let client = self.clone();
    let resource = Resource::from_key(key);
    let key = key.clone();

    Box::pin(async move {
      let resource =
        resource.ok_or_else(|| FetchError::NotFound(format!("No endpoint serves {}", key)))?;
      // Dropping the request future aborts the HTTP call
      tokio::select! {
        biased;
        _ = token.cancelled() => Err(FetchError::Aborted),
        result = client.load(&resource) => result,
      }
    })
  }
}

fn transport_error(e: reqwest::Error) -> FetchError {
  if e.is_decode() {
    FetchError::Serialization(e.to_string())
  } else {
    FetchError::Network(e.to_string())
  }
}

/// Map a non-success response to the error taxonomy.
pub fn status_error(status: StatusCode, body: &[u8]) -> FetchError {
  let message = serde_json::from_slice::<ApiErrorBody>(body)
    .map(|b| b.message)
    .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Auth(message),
    StatusCode::NOT_FOUND => FetchError::NotFound(message),
    StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FetchError::Network(message),
    s if s.is_server_error() => FetchError::Network(message),
    _ => FetchError::Rejected(message),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base: &str) -> ApiClient {
    ApiClient::new(base, Some("secret"), Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn test_status_mapping() {
    assert_eq!(
      status_error(StatusCode::UNAUTHORIZED, b""),
      FetchError::Auth("HTTP 401".into())
    );
    assert!(matches!(status_error(StatusCode::FORBIDDEN, b""), FetchError::Auth(_)));
    assert_eq!(
      status_error(StatusCode::NOT_FOUND, br#"{"message": "no issue 4"}"#),
      FetchError::NotFound("no issue 4".into())
    );
    assert!(matches!(
      status_error(StatusCode::BAD_GATEWAY, b"<html>"),
      FetchError::Network(_)
    ));
    assert!(matches!(
      status_error(StatusCode::TOO_MANY_REQUESTS, b""),
      FetchError::Network(_)
    ));
    assert!(matches!(
      status_error(StatusCode::CONFLICT, b""),
      FetchError::Rejected(_)
    ));
  }

  #[test]
  fn test_urls_append_to_base_path() {
    let api = client("https://example.com/api/v1");
    assert_eq!(
      api.url("issues/7").unwrap().as_str(),
      "https://example.com/api/v1/issues/7"
    );
    let api = client("https://example.com/api/");
    assert_eq!(api.url("bookmarks").unwrap().as_str(), "https://example.com/api/bookmarks");
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(ApiClient::new("not a url", None, Duration::from_secs(1)).is_err());
  }

  #[tokio::test]
  async fn test_unknown_key_is_not_found() {
    let api = client("http://127.0.0.1:9");
    let token = crate::cache::RequestCoordinator::new().begin("profile");
    let result = api.fetch(&CacheKey::root("profile"), token).await;
    assert!(matches!(result, Err(FetchError::NotFound(_))));
  }

  #[tokio::test]
  async fn test_cancelled_fetch_is_aborted() {
    let api = client("http://127.0.0.1:9");
    let requests = crate::cache::RequestCoordinator::new();
    let token = requests.begin("bookmarks");
    requests.cancel("bookmarks");
    let result = api.fetch(&Resource::Bookmarks.key(), token).await;
    assert_eq!(result, Err(FetchError::Aborted));
  }
}
