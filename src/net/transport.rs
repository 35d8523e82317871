//! Single-request transport and its reqwest implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use url::Url;

use super::request::ApiRequest;
use crate::error::ApiError;

/// Issues exactly one request and parses its JSON response.
///
/// Retries, timeouts and connection bookkeeping belong to the executor.
/// Dropping the returned future must abort the request.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError>;
}

/// HTTP transport against the task board API.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("tasklink/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Append the request path to the base URL and encode the query pairs.
  fn endpoint(&self, request: &ApiRequest) -> Result<Url, ApiError> {
    // Url::join would replace the last segment of the base ("/api"), so
    // concatenate instead.
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      request.path.trim_start_matches('/')
    );
    let mut url =
      Url::parse(&joined).map_err(|e| ApiError::Network(format!("invalid url {}: {}", joined, e)))?;

    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(request.query.iter());
    }

    Ok(url)
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
    let url = self.endpoint(request)?;

    let mut builder = self
      .client
      .request(request.method.clone(), url)
      .header(reqwest::header::CONTENT_TYPE, "application/json");
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      // Error bodies look like {"error": "..."}; anything else falls back to the status
      let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| {
          status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
        });

      return Err(ApiError::HttpStatus {
        status: status.as_u16(),
        message,
      });
    }

    response
      .json::<Value>()
      .await
      .map_err(|e| ApiError::Network(format!("failed to read response: {}", e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(&format!("{}/api", server.uri())).unwrap()
  }

  #[tokio::test]
  async fn test_get_with_query_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/tasks"))
      .and(query_param("day", "Terça feira"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tasks": [{"id": 1}]})))
      .mount(&server)
      .await;

    let body = transport(&server)
      .await
      .send(&ApiRequest::get("/tasks").with_query("day", "Terça feira"))
      .await
      .unwrap();

    assert_eq!(body, json!({"tasks": [{"id": 1}]}));
  }

  #[tokio::test]
  async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/tasks/3/toggle"))
      .and(body_json(json!({"user_id": 7})))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task": {"id": 3}})))
      .expect(1)
      .mount(&server)
      .await;

    let body = transport(&server)
      .await
      .send(&ApiRequest::post("/tasks/3/toggle", json!({"user_id": 7})))
      .await
      .unwrap();

    assert_eq!(body["task"]["id"], 3);
  }

  #[tokio::test]
  async fn test_error_field_becomes_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/users/9"))
      .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "User not found"})))
      .mount(&server)
      .await;

    let err = transport(&server)
      .await
      .send(&ApiRequest::get("/users/9"))
      .await
      .unwrap_err();

    match err {
      ApiError::HttpStatus { status, message } => {
        assert_eq!(status, 404);
        assert_eq!(message, "User not found");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_status_without_body_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/stats"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let err = transport(&server)
      .await
      .send(&ApiRequest::get("stats"))
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "Internal Server Error (HTTP 500)");
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let transport = HttpTransport::new("http://localhost:5000/api/").unwrap();
    let url = transport
      .endpoint(&ApiRequest::get("/tasks").with_query("day", "seg"))
      .unwrap();
    assert_eq!(url.as_str(), "http://localhost:5000/api/tasks?day=seg");
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(HttpTransport::new("not a url").is_err());
  }
}
