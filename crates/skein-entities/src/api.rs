//! The network seam the cache is driven through.
//!
//! The cache never talks HTTP itself. Hooks receive fetcher closures, and
//! mutating actions receive an [`Api`] implementation; both resolve to an
//! [`ApiResponse`] carrying the decoded JSON body and pagination links.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::ApiError;

/// A decoded response from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body (`Value::Null` for empty bodies).
    pub data: Value,
    /// URL of the next page, from the `Link` header.
    pub next: Option<String>,
    /// URL of the previous page, from the `Link` header.
    pub prev: Option<String>,
    /// Total number of items, when the server reports one.
    pub total_count: Option<u64>,
}

impl ApiResponse {
    /// A 200 response with the given body and no pagination.
    pub fn new(data: Value) -> Self {
        Self {
            status: 200,
            data,
            next: None,
            prev: None,
            total_count: None,
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_prev(mut self, prev: impl Into<String>) -> Self {
        self.prev = Some(prev.into());
        self
    }

    pub fn with_total_count(mut self, total_count: u64) -> Self {
        self.total_count = Some(total_count);
        self
    }
}

/// REST client injected into feature hooks.
///
/// `path` is either relative to the client's base URL or an absolute URL
/// (pagination links are absolute).
#[async_trait]
pub trait Api: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, ApiError>;

    async fn post(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError>;

    async fn put(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError>;

    async fn patch(&self, path: &str, body: Option<Value>) -> Result<ApiResponse, ApiError>;

    async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError>;
}

/// Boxed future returned by fetchers.
pub type ApiFuture = BoxFuture<'static, Result<ApiResponse, ApiError>>;

/// Produces the request for a single entity or the first page of a list.
pub type Fetcher = Arc<dyn Fn() -> ApiFuture + Send + Sync>;

/// Produces the request for a set of ids in one round trip.
pub type BatchFetcher = Arc<dyn Fn(Vec<String>) -> ApiFuture + Send + Sync>;

/// Produces the request for a pagination link.
pub type PageFetcher = Arc<dyn Fn(String) -> ApiFuture + Send + Sync>;

/// Box a closure into a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiResponse, ApiError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Box a closure into a [`BatchFetcher`].
pub fn batch_fetcher<F, Fut>(f: F) -> BatchFetcher
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiResponse, ApiError>> + Send + 'static,
{
    Arc::new(move |ids| f(ids).boxed())
}

/// Box a closure into a [`PageFetcher`].
pub fn page_fetcher<F, Fut>(f: F) -> PageFetcher
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiResponse, ApiError>> + Send + 'static,
{
    Arc::new(move |url| f(url).boxed())
}
