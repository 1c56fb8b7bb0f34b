use crate::errors::{HarvestError, Result};
use crate::models::fetch::{AttemptOutcome, FailureKind, FetchAttempt, FetchRequest, FetchResponse};
use crate::parsers::classifier::Shape;
use crate::scrapers::base::Fetcher;
use futures::future;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// 每个股票的回退状态机
///
/// `Idle → PrimaryRequested → {PrimarySucceeded, PrimaryFailed}`，失败后
/// `PrimaryFailed → SecondaryRequested → {Done, Exhausted}`。每种策略每次运行最多尝试一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Idle,
    PrimaryRequested,
    PrimarySucceeded,
    PrimaryFailed,
    SecondaryRequested,
    Done,
    Exhausted,
}

impl FallbackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FallbackState::Done | FallbackState::Exhausted)
    }
}

/// 单个股票一次运行的结果
#[derive(Debug, Clone)]
pub struct SymbolReport {
    pub symbol: String,
    pub state: FallbackState,
    pub attempts: Vec<FetchAttempt>,
    pub written: usize,
    pub record_errors: usize,
    pub write_failures: usize,
}

impl SymbolReport {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            state: FallbackState::Idle,
            attempts: Vec::new(),
            written: 0,
            record_errors: 0,
            write_failures: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == FallbackState::Done
    }
}

/// 发出一次请求并登记结果；传输错误和非 2xx 状态都返回 `Err`
pub(crate) async fn fetch_attempt(
    fetcher: &(dyn Fetcher + Send + Sync),
    request: &FetchRequest,
    attempts: &mut Vec<FetchAttempt>,
) -> Result<FetchResponse> {
    let result = fetcher.fetch(request).await;

    let outcome = match &result {
        Ok(response) if response.is_success() => AttemptOutcome::Success {
            status: response.status,
            bytes: response.body.len(),
        },
        Ok(response) => AttemptOutcome::Failure(FailureKind::HttpStatus(response.status)),
        Err(_) => AttemptOutcome::Failure(FailureKind::Transport),
    };
    attempts.push(FetchAttempt {
        symbol: request.symbol.clone(),
        strategy: request.strategy,
        outcome,
    });

    match result {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(HarvestError::HttpStatus {
            status: response.status,
            url: request.url.clone(),
        }),
        Err(e) if e.is_fallback_trigger() => Err(e),
        Err(e) => Err(HarvestError::Transport(e.to_string())),
    }
}

/// 响应体无法识别时，把最后一次尝试改记为失败
pub(crate) fn mark_unrecognized(attempts: &mut [FetchAttempt]) {
    if let Some(last) = attempts.last_mut() {
        last.outcome = AttemptOutcome::Failure(FailureKind::Unrecognized);
    }
}

pub(crate) fn describe(shape: &Shape<'_>) -> String {
    match shape {
        Shape::Unrecognized(reason) => reason.to_string(),
        other => format!("unexpected {} response", other.name()),
    }
}

/// 按并发上限处理全部股票；收到停止信号后不再开始新的股票
pub(crate) async fn run_symbols<'a, F, Fut>(
    symbols: &'a [String],
    concurrency: usize,
    shutdown: &'a AtomicBool,
    process: F,
) -> Vec<SymbolReport>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = SymbolReport>,
{
    stream::iter(symbols.iter())
        .filter(|_| future::ready(!shutdown.load(Ordering::SeqCst)))
        .map(|symbol| process(symbol.as_str()))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}
