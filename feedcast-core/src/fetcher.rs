use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::{redirect, Client};
use tracing::{debug, warn};

use crate::config::{FetchConfig, RetryPolicy};
use crate::error::FetchError;

const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = concat!("feedcast/", env!("CARGO_PKG_VERSION"));

/// Source of raw feed documents.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig, proxy: Option<&str>) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self::with_client(builder.build()?, config))
    }

    pub fn with_client(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            retry: config.retry.clone(),
            max_bytes: config.max_feed_bytes,
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_owned(),
            });
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge { max: self.max_bytes });
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(FetchError::TooLarge { max: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url, bytes = body.len(), "fetched feed");
        Ok(body.freeze())
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        with_backoff(&self.retry, || self.fetch_once(url)).await
    }
}

/// Runs `op` until it succeeds or `policy.attempts` attempts have failed,
/// sleeping between attempts. The last error is returned unchanged.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
