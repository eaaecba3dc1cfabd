//! # Order Source
//!
//! The pluggable fetch function behind every sync cycle.
//!
//! Contract: resolves to the raw payload (any JSON shape; an empty array
//! means "no data") or to an error, which counts as a failed cycle. Plain
//! async closures implement [`OrderSource`], so tests and embedders can
//! register `|| async { Ok(json!([...])) }` directly.

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::http;

/// Asynchronous source of the remote order payload.
pub trait OrderSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, SyncResult<Value>>;
}

impl<F, Fut> OrderSource for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<Value>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'_, SyncResult<Value>> {
        Box::pin(self())
    }
}

/// `GET base_url + orders_path` with the configured request timeout.
#[derive(Debug, Clone)]
pub struct HttpOrderSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpOrderSource {
    pub fn new(config: &EngineConfig) -> SyncResult<Self> {
        let url = http::resolve(&config.base_url()?, &config.api.orders_path)?;
        Self::with_url(url, config.request_timeout())
    }

    pub fn with_url(url: Url, timeout: Duration) -> SyncResult<Self> {
        Ok(HttpOrderSource {
            client: http::client(timeout)?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn get(&self) -> SyncResult<Value> {
        debug!(url = %self.url, "Fetching orders");

        let response = self.client.get(self.url.clone()).send().await?;
        let payload = http::ensure_success(response)?.json::<Value>().await?;

        Ok(payload)
    }
}

impl OrderSource for HttpOrderSource {
    fn fetch(&self) -> BoxFuture<'_, SyncResult<Value>> {
        Box::pin(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_source_url() {
        let mut config = EngineConfig::default();
        config.api.base_url = "https://orders.example.com".into();
        config.api.orders_path = "/v2/orders".into();

        let source = HttpOrderSource::new(&config).unwrap();
        assert_eq!(source.url().as_str(), "https://orders.example.com/v2/orders");
    }

    #[tokio::test]
    async fn test_closure_source() {
        let source = || async { Ok::<_, crate::error::SyncError>(json!([{"id": "1"}])) };
        assert_eq!(source.fetch().await.unwrap(), json!([{"id": "1"}]));
    }
}
