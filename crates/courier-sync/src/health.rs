//! # Health Prober
//!
//! Cheap reachability check run before every full fetch.
//!
//! ## Probe Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  /api/health ──► 2xx? ──► true                                         │
//! │      │ error: one retry; non-2xx: next candidate                       │
//! │      ▼                                                                  │
//! │  /health ──────► 2xx? ──► true                                         │
//! │      ▼                                                                  │
//! │  /api/status ──► 2xx? ──► true                                         │
//! │      ▼                                                                  │
//! │  / (root) ─────► 2xx? ──► true                                         │
//! │      ▼                                                                  │
//! │  false                                                                  │
//! │                                                                         │
//! │  Every request is bounded by the health timeout (~5s).                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::http;

/// Attempts per candidate endpoint (first try plus one retry).
const ATTEMPTS_PER_ENDPOINT: usize = 2;

/// Decides whether the order service is reachable.
pub trait HealthCheck: Send + Sync {
    fn check_health(&self) -> BoxFuture<'_, bool>;
}

impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn check_health(&self) -> BoxFuture<'_, bool> {
        Box::pin(self())
    }
}

/// HTTP health prober over an ordered list of candidate endpoints.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    candidates: Vec<Url>,
}

impl HealthProber {
    /// Creates a prober from the `[api]` settings.
    pub fn new(config: &EngineConfig) -> SyncResult<Self> {
        let base = config.base_url()?;
        let candidates = config
            .api
            .health_endpoints
            .iter()
            .map(|endpoint| http::resolve(&base, endpoint))
            .collect::<SyncResult<Vec<_>>>()?;

        Self::with_candidates(candidates, config.health_timeout())
    }

    /// Creates a prober for explicit candidate URLs.
    pub fn with_candidates(candidates: Vec<Url>, timeout: Duration) -> SyncResult<Self> {
        Ok(HealthProber {
            client: http::client(timeout)?,
            candidates,
        })
    }

    /// Candidate URLs in probe order.
    pub fn candidates(&self) -> &[Url] {
        &self.candidates
    }

    /// Returns true on the first 2xx answer, false if every candidate fails.
    pub async fn probe(&self) -> bool {
        for url in &self.candidates {
            for attempt in 1..=ATTEMPTS_PER_ENDPOINT {
                match self.client.get(url.clone()).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(url = %url, status = %response.status(), "Health probe succeeded");
                        return true;
                    }
                    Ok(response) => {
                        debug!(url = %url, status = %response.status(), "Health endpoint answered non-2xx");
                        break;
                    }
                    Err(e) => {
                        debug!(url = %url, attempt, error = %e, "Health probe request failed");
                    }
                }
            }
        }

        warn!(
            candidates = self.candidates.len(),
            "Health check failed on every endpoint"
        );
        false
    }
}

impl HealthCheck for HealthProber {
    fn check_health(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.probe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// `(path, status)` pairs served by [`stub_server`]. `None` hangs up
    /// without answering, which the client sees as a request error.
    type Routes = &'static [(&'static str, Option<u16>)];

    /// Plain HTTP/1.1 server on a loopback port. Returns its base URL and the
    /// request paths in arrival order.
    async fn stub_server(routes: Routes) -> (Url, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let seen = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("").to_string();
                seen.lock().unwrap().push(path.clone());

                let status = match routes.iter().find(|(route, _)| *route == path) {
                    Some((_, Some(code))) => *code,
                    Some((_, None)) => continue,
                    None => 404,
                };
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (base, hits)
    }

    fn prober_for(base: &Url, paths: &[&str]) -> HealthProber {
        HealthProber {
            client: reqwest::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
            candidates: paths.iter().map(|p| base.join(p).unwrap()).collect(),
        }
    }

    fn hits_of(hits: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        hits.lock().unwrap().clone()
    }

    #[test]
    fn test_candidates_follow_config_order() {
        let mut config = EngineConfig::default();
        config.api.base_url = "https://orders.example.com".into();

        let prober = HealthProber::new(&config).unwrap();
        let urls: Vec<_> = prober.candidates().iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://orders.example.com/api/health",
                "https://orders.example.com/health",
                "https://orders.example.com/api/status",
                "https://orders.example.com/",
            ]
        );
    }

    #[tokio::test]
    async fn test_closure_health_check() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let check = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { false }
        };

        assert!(!check.check_health().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_success_wins_in_candidate_order() {
        let (base, hits) = stub_server(&[("/a", Some(404)), ("/b", Some(200)), ("/c", Some(200))]).await;
        let prober = prober_for(&base, &["/a", "/b", "/c"]);

        assert!(prober.probe().await);
        assert_eq!(hits_of(&hits), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_request_error_is_retried_once() {
        let (base, hits) = stub_server(&[("/drop", None), ("/ok", Some(204))]).await;
        let prober = prober_for(&base, &["/drop", "/ok"]);

        assert!(prober.probe().await);
        assert_eq!(hits_of(&hits), vec!["/drop", "/drop", "/ok"]);
    }

    #[tokio::test]
    async fn test_non_success_status_moves_on_without_retry() {
        let (base, hits) = stub_server(&[("/a", Some(500)), ("/b", Some(503))]).await;
        let prober = prober_for(&base, &["/a", "/b"]);

        assert!(!prober.probe().await);
        assert_eq!(hits_of(&hits), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let prober = prober_for(&base, &["/api/health", "/health"]);
        assert!(!prober.probe().await);
    }
}
