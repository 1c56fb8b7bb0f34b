use quote_harvester::config::{parse_symbol_list, resolve_date_range, Config};
use quote_harvester::scrapers::base::Fetcher;
use quote_harvester::scrapers::http::HttpFetcher;
use quote_harvester::services::board_service::BoardService;
use quote_harvester::services::fallback::SymbolReport;
use quote_harvester::services::price_service::PriceService;

use clap::{App, Arg, ArgMatches, SubCommand};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = App::new("QuoteHarvester")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Historical prices and message boards from Yahoo Finance")
        .arg(
            Arg::with_name("symbols")
                .short('s')
                .long("symbols")
                .value_name("SYMBOLS")
                .help("Comma separated ticker list (default: AAPL,MSFT,GOOG,AMZN,FB,NFLX,TSLA,JPM,WMT,XOM)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("start")
                .long("start")
                .value_name("DATE")
                .help("Start date (YYYY-MM-DD), defaults to one year ago")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("end")
                .long("end")
                .value_name("DATE")
                .help("End date (YYYY-MM-DD), defaults to today")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("delay-ms")
                .long("delay-ms")
                .value_name("MS")
                .help("Minimum delay between two requests")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("N")
                .help("Maximum number of requests in flight")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("backoff-ms")
                .long("backoff-ms")
                .value_name("MS")
                .help("Pause before switching to the fallback strategy")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .global(true),
        )
        .subcommand(SubCommand::with_name("prices").about("Fetch daily price history"))
        .subcommand(SubCommand::with_name("messages").about("Fetch message board posts and replies"))
        .subcommand(SubCommand::with_name("all").about("Fetch price history, then message boards"));

    let matches = app.get_matches();

    let (command, sub_matches) = match matches.subcommand() {
        Some((name, sub)) => (name, sub),
        None => ("all", &matches),
    };

    let config = build_config(sub_matches);
    let today = chrono::Local::now().date_naive();
    let range = resolve_date_range(sub_matches.value_of("start"), sub_matches.value_of("end"), today);
    info!(
        "Symbols: {}; range {} .. {}; output '{}'",
        config.symbols.join(","),
        range.start,
        range.end,
        config.output_dir
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight work");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(&config)?);
    let mut reports: Vec<SymbolReport> = Vec::new();

    if command == "prices" || command == "all" {
        let service = PriceService::new(config.clone(), range, fetcher.clone())?.with_shutdown(shutdown.clone());
        reports.extend(service.run().await);
    }

    if (command == "messages" || command == "all") && !shutdown.load(Ordering::SeqCst) {
        let service = BoardService::new(config.clone(), range, fetcher.clone()).with_shutdown(shutdown.clone());
        reports.extend(service.run().await);
    }

    summarize(&reports);
    Ok(())
}

// 配置文件打底，命令行参数覆盖
fn build_config(matches: &ArgMatches) -> Config {
    let mut config = match matches.value_of("config") {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            warn!("Failed to load config '{}': {}, using defaults", path, e);
            Config::new()
        }),
        None => Config::new(),
    };

    if matches.is_present("symbols") {
        config = config.with_symbols(parse_symbol_list(matches.value_of("symbols")));
    }
    if let Some(dir) = matches.value_of("output") {
        config = config.with_output_dir(dir);
    }
    if let Some(ms) = parse_number::<u64>(matches, "delay-ms") {
        config = config.with_request_delay_ms(ms);
    }
    if let Some(n) = parse_number::<usize>(matches, "concurrency") {
        config = config.with_max_concurrency(n);
    }
    if let Some(ms) = parse_number::<u64>(matches, "backoff-ms") {
        config = config.with_fallback_backoff_ms(ms);
    }
    config
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Option<T> {
    let raw = matches.value_of(name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid value '{}' for --{}, using default", raw, name);
            None
        }
    }
}

fn summarize(reports: &[SymbolReport]) {
    let done = reports.iter().filter(|r| r.is_done()).count();
    let written: usize = reports.iter().map(|r| r.written).sum();
    let skipped: usize = reports.iter().map(|r| r.record_errors).sum();
    let write_failures: usize = reports.iter().map(|r| r.write_failures).sum();

    for report in reports.iter().filter(|r| !r.is_done()) {
        error!(
            "[{}] exhausted after {} attempts",
            report.symbol,
            report.attempts.len()
        );
    }
    info!(
        "Run complete: {} succeeded, {} exhausted, {} files written, {} records skipped, {} write failures",
        done,
        reports.len() - done,
        written,
        skipped,
        write_failures
    );
}
