use crate::config::Config;
use crate::errors::{HarvestError, Result};
use crate::models::record::DateRange;
use crate::parsers::classifier::{classify, ContentHints, DeclaredFormat, Shape};
use crate::parsers::price::{extract_chart, extract_tabular, render_price_csv};
use crate::parsers::ExtractContext;
use crate::scrapers::base::Fetcher;
use crate::scrapers::yahoo;
use crate::services::fallback::{self, FallbackState, SymbolReport};
use crate::services::writer::{RecordKind, RecordWriter};
use chrono::Utc;
use chrono_tz::Tz;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 历史行情服务：CSV 导出为主策略，chart JSON 为备用策略
pub struct PriceService {
    config: Config,
    range: DateRange,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    writer: RecordWriter,
    default_tz: Tz,
    shutdown: Arc<AtomicBool>,
}

impl PriceService {
    pub fn new(config: Config, range: DateRange, fetcher: Arc<dyn Fetcher + Send + Sync>) -> Result<Self> {
        let default_tz: Tz = config
            .default_timezone
            .parse()
            .map_err(|e| HarvestError::Config(format!("invalid timezone '{}': {}", config.default_timezone, e)))?;
        let writer = RecordWriter::new(&config.output_dir);

        Ok(Self {
            config,
            range,
            fetcher,
            writer,
            default_tz,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 处理配置中的全部股票
    pub async fn run(&self) -> Vec<SymbolReport> {
        info!(
            "Fetching price history for {} symbols ({} .. {})",
            self.config.symbols.len(),
            self.range.start,
            self.range.end
        );

        let reports = fallback::run_symbols(
            &self.config.symbols,
            self.config.max_concurrency,
            &self.shutdown,
            |symbol| self.process_symbol(symbol),
        )
        .await;

        let done = reports.iter().filter(|r| r.is_done()).count();
        info!(
            "Price history finished: {} succeeded, {} exhausted",
            done,
            reports.len() - done
        );
        reports
    }

    /// 单个股票的回退流程，最多两次请求
    pub async fn process_symbol(&self, symbol: &str) -> SymbolReport {
        let mut report = SymbolReport::new(symbol);
        let mut state = FallbackState::Idle;

        while !state.is_terminal() {
            state = match state {
                FallbackState::Idle => FallbackState::PrimaryRequested,
                FallbackState::PrimaryRequested => match self.fetch_tabular(symbol, &mut report).await {
                    Ok(()) => FallbackState::PrimarySucceeded,
                    Err(e) => {
                        warn!("[{}] CSV export failed: {}", symbol, e);
                        FallbackState::PrimaryFailed
                    }
                },
                FallbackState::PrimarySucceeded => FallbackState::Done,
                FallbackState::PrimaryFailed => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        warn!("[{}] shutdown requested, skipping chart fallback", symbol);
                        FallbackState::Exhausted
                    } else {
                        tokio::time::sleep(self.config.fallback_backoff()).await;
                        FallbackState::SecondaryRequested
                    }
                }
                FallbackState::SecondaryRequested => match self.fetch_chart(symbol, &mut report).await {
                    Ok(()) => FallbackState::Done,
                    Err(e) => {
                        error!("[{}] all price strategies failed, last error: {}", symbol, e);
                        FallbackState::Exhausted
                    }
                },
                FallbackState::Done | FallbackState::Exhausted => state,
            };
        }

        report.state = state;
        report
    }

    async fn fetch_tabular(&self, symbol: &str, report: &mut SymbolReport) -> Result<()> {
        let request = yahoo::tabular_export_request(symbol, &self.range)?;
        let response = fallback::fetch_attempt(&*self.fetcher, &request, &mut report.attempts).await?;

        let shape = classify(&response.body, &ContentHints::declared(DeclaredFormat::Csv));
        let export = match shape {
            Shape::TabularPriceExport(text) => extract_tabular(text),
            other => Err(HarvestError::Classification(fallback::describe(&other))),
        };
        let export = match export {
            Ok(export) => export,
            Err(e) => {
                fallback::mark_unrecognized(&mut report.attempts);
                self.dump_raw(symbol, RecordKind::RawCsv, &response.body);
                return Err(e);
            }
        };

        for e in &export.errors {
            warn!("[{}] skipping CSV {}", symbol, e);
        }
        report.record_errors += export.errors.len();

        info!("[{}] CSV export with {} rows", symbol, export.rows);
        self.persist(symbol, export.payload(), report);
        Ok(())
    }

    async fn fetch_chart(&self, symbol: &str, report: &mut SymbolReport) -> Result<()> {
        let request = yahoo::chart_request(symbol, &self.range)?;
        let response = fallback::fetch_attempt(&*self.fetcher, &request, &mut report.attempts).await?;

        let ctx = ExtractContext {
            symbol,
            range: self.range,
            now: Utc::now().naive_utc(),
        };
        let series = match classify(&response.body, &ContentHints::declared(DeclaredFormat::Json)) {
            Shape::ChartTimeSeries(json) => {
                extract_chart(json, &ctx, self.default_tz).map_err(|e| HarvestError::Classification(e.to_string()))
            }
            other => Err(HarvestError::Classification(fallback::describe(&other))),
        };
        let series = match series {
            Ok(series) => series,
            Err(e) => {
                fallback::mark_unrecognized(&mut report.attempts);
                self.dump_raw(symbol, RecordKind::RawJson, &response.body);
                return Err(e);
            }
        };

        for e in &series.errors {
            warn!("[{}] skipping chart {}", symbol, e);
        }
        report.record_errors += series.errors.len();

        let payload = render_price_csv(&series.rows, series.has_adj_close)?;
        info!(
            "[{}] chart data with {} rows ({})",
            symbol,
            series.rows.len(),
            series.timezone
        );
        self.persist(symbol, &payload, report);
        Ok(())
    }

    fn persist(&self, symbol: &str, payload: &[u8], report: &mut SymbolReport) {
        match self.writer.write(symbol, RecordKind::PriceHistory, symbol, payload) {
            Ok(path) => {
                info!("[{}] saved {}", symbol, path.display());
                report.written += 1;
            }
            Err(e) => {
                error!("[{}] failed to save price history: {}", symbol, e);
                report.write_failures += 1;
            }
        }
    }

    // 无法解析的响应留给事后排查
    fn dump_raw(&self, symbol: &str, kind: RecordKind, body: &[u8]) {
        match self.writer.write(symbol, kind, symbol, body) {
            Ok(path) => info!("[{}] raw response saved to {}", symbol, path.display()),
            Err(e) => warn!("[{}] failed to save raw response: {}", symbol, e),
        }
    }
}
