//! Shared reqwest plumbing for the HTTP adapters.

use std::time::Duration;

use courier_core::HttpMethod;
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Builds a client whose requests give up after `timeout`.
pub(crate) fn client(timeout: Duration) -> SyncResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))
}

/// Resolves `target` against `base`. Absolute targets are used as-is.
pub(crate) fn resolve(base: &Url, target: &str) -> SyncResult<Url> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(base.join(target)?),
        Err(e) => Err(SyncError::InvalidUrl(format!("{}: {}", target, e))),
    }
}

/// Turns a non-2xx response into [`SyncError::HttpStatus`].
pub(crate) fn ensure_success(response: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SyncError::HttpStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

pub(crate) fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}
