//! REST client for a Mastodon-compatible server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use skein_entities::{Api, ApiError, ApiResponse};

/// Error body returned by the server on failures.
#[derive(Debug, Deserialize)]
struct ServerError {
    error: String,
}

/// HTTP implementation of [`Api`].
pub struct HttpApi {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpApi {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
        }
    }

    /// Authenticate requests with a bearer token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve `path` against the base URL. Absolute URLs (pagination
    /// links) pass through unchanged.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.url(path);
        debug!(method = %method, url = %url, "api request");

        let mut request = self.http.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(network_error)?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ApiError::RateLimited { retry_after_secs });
        }

        let (next, prev) = response
            .headers()
            .get("Link")
            .and_then(|v| v.to_str().ok())
            .map(parse_link_header)
            .unwrap_or_default();
        let total_count = response
            .headers()
            .get("x-total-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        let text = response.text().await.map_err(|e| {
            ApiError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status, e
            ))
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ServerError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            warn!(status = status.as_u16(), message = %message, "api request failed");
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            data,
            next,
            prev,
            total_count,
        })
    }
}

fn network_error(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}

/// Extract the `next` and `prev` URLs from an RFC 8288 `Link` header.
pub fn parse_link_header(header: &str) -> (Option<String>, Option<String>) {
    let mut next = None;
    let mut prev = None;

    for link in header.split(',') {
        let mut parts = link.split(';');
        let Some(target) = parts.next() else {
            continue;
        };
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');

        for param in parts {
            let Some((key, value)) = param.trim().split_once('=') else {
                continue;
            };
            if key.trim() != "rel" {
                continue;
            }
            match value.trim().trim_matches('"') {
                "next" => next = Some(target.to_string()),
                "prev" | "previous" => prev = Some(target.to_string()),
                _ => {}
            }
        }
    }

    (next, prev)
}

#[async_trait]
impl Api for HttpApi {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, ApiError> {
        self.send(Method::GET, path, query, None).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
        self.send(Method::POST, path, &[], body).await
    }

    async fn put(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
        self.send(Method::PUT, path, &[], body).await
    }

    async fn patch(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError> {
        self.send(Method::PATCH, path, &[], body).await
    }

    async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(Method::DELETE, path, &[], None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpApi::new("https://example.com/");
        assert_eq!(api.base_url(), "https://example.com");
        assert_eq!(api.url("/api/v1/accounts/1"), "https://example.com/api/v1/accounts/1");
        assert_eq!(api.url("https://other.example/page"), "https://other.example/page");
    }

    #[test]
    fn test_parse_link_header() {
        let header = r#"<https://example.com/api/v1/accounts/1/followers?max_id=7>; rel="next", <https://example.com/api/v1/accounts/1/followers?min_id=9>; rel="prev""#;
        let (next, prev) = parse_link_header(header);
        assert_eq!(next.as_deref(), Some("https://example.com/api/v1/accounts/1/followers?max_id=7"));
        assert_eq!(prev.as_deref(), Some("https://example.com/api/v1/accounts/1/followers?min_id=9"));

        assert_eq!(parse_link_header(""), (None, None));
    }

    #[tokio::test]
    async fn test_get_with_pagination_headers() {
        let mock_server = MockServer::start().await;
        let next = format!("{}/api/v1/blocks?max_id=3", mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/v1/blocks"))
            .and(query_param("limit", "2"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{}>; rel=\"next\"", next).as_str())
                    .insert_header("x-total-count", "5")
                    .set_body_json(serde_json::json!([{"id": "1"}, {"id": "2"}])),
            )
            .mount(&mock_server)
            .await;

        let api = HttpApi::new(mock_server.uri()).with_access_token("secret");
        let response = api.get("/api/v1/blocks", &[("limit", "2".to_string())]).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.next, Some(next));
        assert_eq!(response.prev, None);
        assert_eq!(response.total_count, Some(5));
        assert_eq!(response.data.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/1"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": "The access token is invalid"})),
            )
            .mount(&mock_server)
            .await;

        let api = HttpApi::new(mock_server.uri());
        let err = api.get("/api/v1/accounts/1", &[]).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Http {
                status: 401,
                message: "The access token is invalid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/accounts/1/follow"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&mock_server)
            .await;

        let api = HttpApi::new(mock_server.uri());
        let err = api.post("/api/v1/accounts/1/follow", None).await.unwrap_err();
        assert_eq!(err, ApiError::RateLimited { retry_after_secs: Some(30) });
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/statuses/1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let api = HttpApi::new(mock_server.uri());
        let response = api.delete("/api/v1/statuses/1").await.unwrap();
        assert_eq!(response.data, Value::Null);
    }
}
