use crate::config::Config;
use crate::errors::{HarvestError, Result};
use crate::models::fetch::{FetchRequest, FetchResponse};
use crate::scrapers::base::Fetcher;
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, REFERER};
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

/// 基于 reqwest 的抓取器，负责限速与并发上限
pub struct HttpFetcher {
    client: Client,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    permits: Semaphore,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(HarvestError::RequestError)?;

        Ok(Self {
            client,
            request_interval: config.request_delay(),
            last_request: Mutex::new(None),
            permits: Semaphore::new(config.max_concurrency.max(1)),
        })
    }

    // 全局限速：任意两次请求发出之间至少间隔 request_interval
    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(time) = *last {
            let elapsed = time.elapsed();
            if elapsed < self.request_interval {
                let wait_time = self.request_interval - elapsed;
                debug!("Waiting {:?} before next request", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        self.wait_for_rate_limit().await;
        debug!("[{}] {} GET {}", request.symbol, request.strategy, request.url);

        let response = self
            .client
            .get(&request.url)
            .header(REFERER, request.referer.as_str())
            .send()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| HarvestError::Transport(e.to_string()))?
            .to_vec();

        debug!("[{}] {} -> HTTP {} ({} bytes)", request.symbol, request.strategy, status, body.len());

        Ok(FetchResponse { url, status, body })
    }
}
