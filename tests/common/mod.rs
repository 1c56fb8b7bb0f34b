#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use quote_harvester::config::Config;
use quote_harvester::errors::{HarvestError, Result};
use quote_harvester::models::fetch::{FetchRequest, FetchResponse};
use quote_harvester::models::record::DateRange;
use quote_harvester::scrapers::base::Fetcher;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum Scripted {
    Body(u16, Vec<u8>),
    TransportError,
}

impl Scripted {
    pub fn ok(body: &str) -> Self {
        Scripted::Body(200, body.as_bytes().to_vec())
    }

    pub fn status(status: u16, body: &str) -> Self {
        Scripted::Body(status, body.as_bytes().to_vec())
    }
}

struct Route {
    pattern: String,
    responses: VecDeque<Scripted>,
}

/// 内存中的 Fetcher：按 URL 片段返回预设响应，并记录全部请求
///
/// 多个片段都匹配时取最长的；队列只剩一个响应时重复返回它；没有匹配的 URL 返回 404。
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, response: Scripted) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|r| r.pattern == pattern) {
                Some(route) => route.responses.push_back(response),
                None => routes.push(Route {
                    pattern: pattern.to_string(),
                    responses: VecDeque::from(vec![response]),
                }),
            }
        }
        self
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = {
            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .iter_mut()
                .filter(|r| request.url.contains(&r.pattern))
                .max_by_key(|r| r.pattern.len());
            match route {
                Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
                Some(route) => route.responses.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(Scripted::Body(status, body)) => Ok(FetchResponse {
                url: request.url.clone(),
                status,
                body,
            }),
            Some(Scripted::TransportError) => Err(HarvestError::Transport("connection reset".into())),
            None => Ok(FetchResponse {
                url: request.url.clone(),
                status: 404,
                body: b"Not Found".to_vec(),
            }),
        }
    }
}

pub fn test_config(output: &Path, symbols: &[&str]) -> Config {
    Config::new()
        .with_symbols(symbols.iter().map(|s| s.to_string()).collect())
        .with_output_dir(&output.to_string_lossy())
        .with_request_delay_ms(0)
        .with_fallback_backoff_ms(0)
}

pub fn date_range(start: (i32, u32, u32), end: (i32, u32, u32)) -> DateRange {
    DateRange::from_dates(
        NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
        NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
    )
    .unwrap()
}
