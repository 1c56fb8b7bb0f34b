use crate::config::Config;
use crate::errors::{HarvestError, Result};
use crate::models::fetch::FetchRequest;
use crate::models::record::{DateRange, Message};
use crate::parsers::board::{extract_conversation, extract_legacy_detail, extract_legacy_listing, ListingEntry};
use crate::parsers::classifier::{classify, ContentHints, DeclaredFormat, Shape};
use crate::parsers::ExtractContext;
use crate::scrapers::base::Fetcher;
use crate::scrapers::yahoo;
use crate::services::fallback::{self, FallbackState, SymbolReport};
use crate::services::writer::{RecordKind, RecordWriter};
use chrono::{NaiveDateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 讨论区服务：新版社区页为主策略，旧版讨论区（列表 + 详情页）为备用策略
pub struct BoardService {
    config: Config,
    range: DateRange,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    writer: RecordWriter,
    now: NaiveDateTime,
    shutdown: Arc<AtomicBool>,
}

impl BoardService {
    pub fn new(config: Config, range: DateRange, fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        let writer = RecordWriter::new(&config.output_dir);
        Self {
            config,
            range,
            fetcher,
            writer,
            now: Utc::now().naive_utc(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 固定 "3 hours ago" 等相对时间的参照点
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn context<'a>(&self, symbol: &'a str) -> ExtractContext<'a> {
        ExtractContext {
            symbol,
            range: self.range,
            now: self.now,
        }
    }

    pub async fn run(&self) -> Vec<SymbolReport> {
        info!("Fetching message boards for {} symbols", self.config.symbols.len());

        let reports = fallback::run_symbols(
            &self.config.symbols,
            self.config.max_concurrency,
            &self.shutdown,
            |symbol| self.process_symbol(symbol),
        )
        .await;

        let written: usize = reports.iter().map(|r| r.written).sum();
        let done = reports.iter().filter(|r| r.is_done()).count();
        info!(
            "Message boards finished: {} succeeded, {} exhausted, {} files written",
            done,
            reports.len() - done,
            written
        );
        reports
    }

    pub async fn process_symbol(&self, symbol: &str) -> SymbolReport {
        let mut report = SymbolReport::new(symbol);
        let mut state = FallbackState::Idle;

        while !state.is_terminal() {
            state = match state {
                FallbackState::Idle => FallbackState::PrimaryRequested,
                FallbackState::PrimaryRequested => match self.fetch_community(symbol, &mut report).await {
                    Ok(()) => FallbackState::PrimarySucceeded,
                    Err(e) => {
                        warn!("[{}] community page failed: {}", symbol, e);
                        FallbackState::PrimaryFailed
                    }
                },
                FallbackState::PrimarySucceeded => FallbackState::Done,
                FallbackState::PrimaryFailed => {
                    if self.is_shutting_down() {
                        FallbackState::Exhausted
                    } else {
                        tokio::time::sleep(self.config.fallback_backoff()).await;
                        FallbackState::SecondaryRequested
                    }
                }
                FallbackState::SecondaryRequested => match self.crawl_legacy_board(symbol, &mut report).await {
                    Ok(()) => FallbackState::Done,
                    Err(e) => {
                        error!("[{}] all message board strategies failed, last error: {}", symbol, e);
                        FallbackState::Exhausted
                    }
                },
                FallbackState::Done | FallbackState::Exhausted => state,
            };
        }

        report.state = state;
        report
    }

    async fn fetch_community(&self, symbol: &str, report: &mut SymbolReport) -> Result<()> {
        let request = yahoo::community_request(symbol);
        let response = fallback::fetch_attempt(&*self.fetcher, &request, &mut report.attempts).await?;

        let state = match classify(&response.body, &ContentHints::declared(DeclaredFormat::Html)) {
            Shape::ConversationJson(state) => state,
            other => {
                fallback::mark_unrecognized(&mut report.attempts);
                self.dump_raw(symbol, &response.body);
                return Err(HarvestError::Classification(fallback::describe(&other)));
            }
        };

        let extraction = extract_conversation(&state, &self.context(symbol));
        for e in &extraction.errors {
            warn!("[{}] skipping conversation {}", symbol, e);
        }
        report.record_errors += extraction.errors.len();

        info!("[{}] {} messages in range on community page", symbol, extraction.records.len());
        for message in &extraction.records {
            self.save_message(message, report);
        }
        Ok(())
    }

    /// 旧版讨论区：逐页读取列表，并抓取每条区间内消息的详情页
    ///
    /// 翻页在没有 Next 链接、URL 重复、超过 `max_pages` 或整页早于区间起点时停止。
    /// 只有第一页失败才算该策略失败，后续页失败只结束翻页。
    async fn crawl_legacy_board(&self, symbol: &str, report: &mut SymbolReport) -> Result<()> {
        let ctx = self.context(symbol);
        let mut visited = HashSet::new();
        let mut request = yahoo::legacy_board_request(symbol);
        let mut pages = 0;

        loop {
            if self.is_shutting_down() {
                warn!("[{}] shutdown requested, stopping pagination", symbol);
                break;
            }
            if !visited.insert(request.url.clone()) {
                warn!("[{}] page {} already visited, stopping pagination", symbol, request.url);
                break;
            }

            let response = match fallback::fetch_attempt(&*self.fetcher, &request, &mut report.attempts).await {
                Ok(response) => response,
                Err(e) if pages == 0 => return Err(e),
                Err(e) => {
                    warn!("[{}] stopping pagination: {}", symbol, e);
                    break;
                }
            };

            let page = match classify(&response.body, &ContentHints::declared(DeclaredFormat::Html)) {
                Shape::LegacyBoardHtml(html) => extract_legacy_listing(html, &ctx),
                other => {
                    fallback::mark_unrecognized(&mut report.attempts);
                    if pages == 0 {
                        self.dump_raw(symbol, &response.body);
                        return Err(HarvestError::Classification(fallback::describe(&other)));
                    }
                    warn!("[{}] stopping pagination at {}: {}", symbol, request.url, fallback::describe(&other));
                    break;
                }
            };
            pages += 1;

            for e in &page.entries.errors {
                warn!("[{}] skipping listing {}", symbol, e);
            }
            report.record_errors += page.entries.errors.len();
            debug!(
                "[{}] listing page {} has {} messages in range",
                symbol,
                pages,
                page.entries.records.len()
            );

            for entry in &page.entries.records {
                if self.is_shutting_down() {
                    break;
                }
                self.save_legacy_message(symbol, entry, &ctx, report).await;
            }

            if page.is_past_range() {
                info!("[{}] reached messages older than {}, stopping", symbol, self.range.start);
                break;
            }
            if pages >= self.config.max_pages {
                warn!("[{}] reached page limit {}", symbol, self.config.max_pages);
                break;
            }

            request = match page.next_href.as_deref() {
                Some(href) => match yahoo::resolve_link(&response.url, href) {
                    Ok(url) => yahoo::legacy_page_request(symbol, url),
                    Err(e) => {
                        warn!("[{}] invalid next link '{}': {}", symbol, href, e);
                        break;
                    }
                },
                None => break,
            };
        }

        info!("[{}] legacy board crawl finished after {} pages", symbol, pages);
        Ok(())
    }

    // 详情页失败时退回列表信息，不影响其它消息
    async fn save_legacy_message(
        &self,
        symbol: &str,
        entry: &ListingEntry,
        ctx: &ExtractContext<'_>,
        report: &mut SymbolReport,
    ) {
        debug!("[{}] message {} '{}'", symbol, entry.message_id, entry.subject);
        let request: FetchRequest = yahoo::legacy_message_request(symbol, &entry.message_id);
        let detail = match fallback::fetch_attempt(&*self.fetcher, &request, &mut report.attempts).await {
            Ok(response) => match classify(&response.body, &ContentHints::declared(DeclaredFormat::Html)) {
                Shape::LegacyMessageDetail(html) => Some(extract_legacy_detail(html, entry, ctx)),
                other => {
                    fallback::mark_unrecognized(&mut report.attempts);
                    warn!("[{}] message {} detail: {}", symbol, entry.message_id, fallback::describe(&other));
                    None
                }
            },
            Err(e) => {
                warn!("[{}] message {} detail: {}", symbol, entry.message_id, e);
                None
            }
        };

        match detail {
            Some(detail) => {
                for e in &detail.replies.errors {
                    warn!("[{}] skipping reply {}", symbol, e);
                }
                report.record_errors += detail.replies.errors.len();

                self.save_message(&detail.message, report);
                for reply in &detail.replies.records {
                    match self.writer.write_json(symbol, RecordKind::Reply, &reply.reply_id, reply) {
                        Ok(_) => {
                            info!("[{}] saved reply {} for message {}", symbol, reply.reply_id, reply.parent_id);
                            report.written += 1;
                        }
                        Err(e) => {
                            error!("[{}] failed to save reply {}: {}", symbol, reply.reply_id, e);
                            report.write_failures += 1;
                        }
                    }
                }
            }
            None => self.save_message(&entry.to_message(symbol), report),
        }
    }

    fn save_message(&self, message: &Message, report: &mut SymbolReport) {
        match self
            .writer
            .write_json(&message.symbol, RecordKind::Message, &message.message_id, message)
        {
            Ok(_) => {
                info!("[{}] saved message {}", message.symbol, message.message_id);
                report.written += 1;
            }
            Err(e) => {
                error!("[{}] failed to save message {}: {}", message.symbol, message.message_id, e);
                report.write_failures += 1;
            }
        }
    }

    fn dump_raw(&self, symbol: &str, body: &[u8]) {
        match self.writer.write(symbol, RecordKind::RawHtml, symbol, body) {
            Ok(path) => info!("[{}] raw page saved to {}", symbol, path.display()),
            Err(e) => warn!("[{}] failed to save raw page: {}", symbol, e),
        }
    }
}
