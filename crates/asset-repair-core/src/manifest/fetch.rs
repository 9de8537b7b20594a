use crate::control::CancelToken;
use crate::error::Error;
use std::fs;
use std::time::Duration;
use tracing::debug;

/// Source of raw manifest bytes.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, Error>;
}

/// Externally supplied retry/backoff/timeout policy wrapped around a single
/// fetch attempt. The engine only issues the inner call.
pub trait RetryWrapper: Send + Sync {
    fn run(
        &self,
        url: &str,
        attempt: &mut dyn FnMut() -> Result<Vec<u8>, Error>,
    ) -> Result<Vec<u8>, Error>;
}

/// Wrapper that makes exactly one attempt.
pub struct SingleAttempt;

impl RetryWrapper for SingleAttempt {
    fn run(
        &self,
        _url: &str,
        attempt: &mut dyn FnMut() -> Result<Vec<u8>, Error>,
    ) -> Result<Vec<u8>, Error> {
        attempt()
    }
}

/// Fetch `url` through the supplied retry wrapper.
pub fn fetch_with(
    wrapper: &dyn RetryWrapper,
    fetcher: &dyn Fetcher,
    url: &str,
    cancel: &CancelToken,
) -> Result<Vec<u8>, Error> {
    cancel.check()?;
    wrapper.run(url, &mut || {
        cancel.check()?;
        fetcher.fetch(url, cancel)
    })
}

/// Blocking HTTP fetcher. `file://` URLs are read from disk, which is how
/// mirrored manifests are checked offline.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::network("<client>", e.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, Error> {
        cancel.check()?;

        if let Some(path) = url.strip_prefix("file://") {
            debug!("Reading manifest from {}", path);
            return fs::read(path).map_err(|e| Error::network(url, e.to_string()));
        }

        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::network(url, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(Error::network(url, format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .map_err(|e| Error::network(url, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
