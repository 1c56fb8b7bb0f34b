use crate::errors::{HarvestError, Result};
use crate::models::record::DateRange;
use chrono::{Duration as ChronoDuration, NaiveDate};
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 默认抓取的股票列表，价格与讨论区两条流水线共用
pub const DEFAULT_SYMBOLS: [&str; 10] = [
    "AAPL", "MSFT", "GOOG", "AMZN", "FB", "NFLX", "TSLA", "JPM", "WMT", "XOM",
];

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub symbols: Vec<String>,
    pub output_dir: String,
    pub request_delay_ms: u64,
    pub max_concurrency: usize,
    pub fallback_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub default_timezone: String,
    pub max_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            output_dir: "output".to_string(),
            request_delay_ms: 3000,
            max_concurrency: 1,
            fallback_backoff_ms: 2000,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_timezone: "America/New_York".to_string(),
            max_pages: 500,
        }
    }

    /// 从 JSON 文件加载配置，缺失字段使用默认值
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&content)?;
        info!("Loaded configuration from {}", path.as_ref().display());
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.max_concurrency == 0 {
            return Err(HarvestError::Config("max_concurrency must be at least 1".to_string()));
        }
        if self.symbols.is_empty() {
            return Err(HarvestError::Config("symbol list is empty".to_string()));
        }
        Ok(self)
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        if !symbols.is_empty() {
            self.symbols = symbols;
        }
        self
    }

    pub fn with_output_dir(mut self, dir: &str) -> Self {
        self.output_dir = dir.to_string();
        self
    }

    pub fn with_request_delay_ms(mut self, ms: u64) -> Self {
        self.request_delay_ms = ms;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_fallback_backoff_ms(mut self, ms: u64) -> Self {
        self.fallback_backoff_ms = ms;
        self
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = max.max(1);
        self
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn fallback_backoff(&self) -> Duration {
        Duration::from_millis(self.fallback_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 解析逗号分隔的股票列表，空串时返回默认列表
pub fn parse_symbol_list(raw: Option<&str>) -> Vec<String> {
    let symbols: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    if symbols.is_empty() {
        DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
    } else {
        symbols
    }
}

/// 根据命令行参数确定日期区间
///
/// 默认区间为一年前到今天。无法解析的日期会记录警告并使用默认值，
/// 起止颠倒时整体回落到默认区间。结束日包含当天全部时间。
pub fn resolve_date_range(start: Option<&str>, end: Option<&str>, today: NaiveDate) -> DateRange {
    let default_start = today - ChronoDuration::days(365);

    let start_date = parse_cli_date("start", start).unwrap_or(default_start);
    let end_date = parse_cli_date("end", end).unwrap_or(today);

    match DateRange::from_dates(start_date, end_date) {
        Ok(range) => range,
        Err(e) => {
            warn!("{}; falling back to {} .. {}", e, default_start, today);
            DateRange::spanning_days(default_start, today)
        }
    }
}

fn parse_cli_date(label: &str, raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            warn!("Invalid {} date '{}' ({}), using default", label, raw, e);
            None
        }
    }
}
