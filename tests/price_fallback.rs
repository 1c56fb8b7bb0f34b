mod common;

use common::{date_range, test_config, Scripted, ScriptedFetcher};
use quote_harvester::models::fetch::{AttemptOutcome, FailureKind, Strategy};
use quote_harvester::services::fallback::FallbackState;
use quote_harvester::services::price_service::PriceService;
use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const EXPORT_CSV: &str = "Date,Open,High,Low,Close,Adj Close,Volume\n\
2023-01-03,130.279999,130.899994,124.169998,125.070000,124.216301,112117500\n\
2023-01-04,126.889999,128.660004,125.080002,126.360001,125.497498,89113600\n";

fn chart_json(with_adj_close: bool) -> String {
    let adjclose = if with_adj_close {
        r#","adjclose":[{"adjclose":[124.2,null,124.3]}]"#
    } else {
        ""
    };
    format!(
        r#"{{"chart":{{"result":[{{
            "meta":{{"symbol":"AAPL","exchangeTimezoneName":"America/New_York"}},
            "timestamp":[1672756200,1672842600,1672929000],
            "indicators":{{"quote":[{{
                "open":[130.28,null,127.13],
                "high":[130.9,128.66,127.77],
                "low":[124.17,125.08,124.76],
                "close":[125.07,126.36,125.02],
                "volume":[112117500,89113600,80962700]
            }}]{}}}
        }}],"error":null}}}}"#,
        adjclose
    )
}

fn service(dir: &std::path::Path, symbols: &[&str], fetcher: &Arc<ScriptedFetcher>) -> PriceService {
    PriceService::new(
        test_config(dir, symbols),
        date_range((2023, 1, 1), (2023, 1, 10)),
        fetcher.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn csv_export_is_written_verbatim_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new().on("/v7/finance/download/AAPL", Scripted::ok(EXPORT_CSV)));

    let reports = service(dir.path(), &["AAPL"], &fetcher).run().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, FallbackState::Done);
    assert_eq!(reports[0].attempts.len(), 1);
    assert!(reports[0].attempts[0].succeeded());

    let requests = fetcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].strategy, Strategy::TabularExport);
    assert!(requests[0].url.contains("period1=1672531200"));
    assert!(requests[0].url.contains("download=true"));
    assert_eq!(requests[0].referer, "https://finance.yahoo.com/quote/AAPL/history?p=AAPL");

    let written = fs::read_to_string(dir.path().join("AAPL_historical_data.csv")).unwrap();
    assert_eq!(written, EXPORT_CSV);
    assert!(!dir.path().join("raw").exists());
}

#[tokio::test]
async fn server_error_falls_back_to_chart_with_adj_close() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on("/v7/finance/download/AAPL", Scripted::status(500, "Internal Server Error"))
            .on("/v8/finance/chart/AAPL", Scripted::ok(&chart_json(true))),
    );

    let reports = service(dir.path(), &["AAPL"], &fetcher).run().await;
    let report = &reports[0];

    assert_eq!(report.state, FallbackState::Done);
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Failure(FailureKind::HttpStatus(500)));
    assert_eq!(report.attempts[1].strategy, Strategy::ChartTimeSeries);

    let written = fs::read_to_string(dir.path().join("AAPL_historical_data.csv")).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Date,Open,High,Low,Close,Adj Close,Volume",
            "2023-01-03,130.28,130.9,124.17,125.07,124.2,112117500",
            "2023-01-05,127.13,127.77,124.76,125.02,124.3,80962700",
        ]
    );
}

#[tokio::test]
async fn unrecognized_export_is_dumped_and_chart_omits_adj_close() {
    let dir = tempfile::tempdir().unwrap();
    let error_page = "<html><body><h1>Will be right back</h1></body></html>";
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on("/v7/finance/download/AAPL", Scripted::ok(error_page))
            .on("/v8/finance/chart/AAPL", Scripted::ok(&chart_json(false))),
    );

    let reports = service(dir.path(), &["AAPL"], &fetcher).run().await;
    let report = &reports[0];

    assert_eq!(report.state, FallbackState::Done);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Failure(FailureKind::Unrecognized));

    let raw = fs::read_to_string(dir.path().join("raw").join("AAPL_raw_csv_response.txt")).unwrap();
    assert_eq!(raw, error_page);

    let written = fs::read_to_string(dir.path().join("AAPL_historical_data.csv")).unwrap();
    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("Date,Open,High,Low,Close,Volume"));
    assert_eq!(lines.count(), 2);
}

#[tokio::test]
async fn transport_failures_stop_after_both_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on("/v7/finance/download/AAPL", Scripted::TransportError)
            .on("/v8/finance/chart/AAPL", Scripted::TransportError),
    );

    let reports = service(dir.path(), &["AAPL"], &fetcher).run().await;
    let report = &reports[0];

    assert_eq!(report.state, FallbackState::Exhausted);
    assert_eq!(report.written, 0);
    assert_eq!(fetcher.requests().len(), 2);
    assert!(report
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::Failure(FailureKind::Transport)));
    assert!(!dir.path().join("AAPL_historical_data.csv").exists());
}

#[tokio::test]
async fn one_failing_symbol_does_not_affect_others() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on("/v7/finance/download/AAPL", Scripted::ok(EXPORT_CSV))
            .on("/v7/finance/download/MSFT", Scripted::status(403, "Forbidden"))
            .on("/v8/finance/chart/MSFT", Scripted::status(404, "Not Found")),
    );

    let mut reports = service(dir.path(), &["AAPL", "MSFT"], &fetcher).run().await;
    reports.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    assert_eq!(reports[0].symbol, "AAPL");
    assert!(reports[0].is_done());
    assert_eq!(reports[1].symbol, "MSFT");
    assert_eq!(reports[1].state, FallbackState::Exhausted);
    assert_eq!(reports[1].attempts.len(), 2);

    assert!(dir.path().join("AAPL_historical_data.csv").exists());
    assert!(!dir.path().join("MSFT_historical_data.csv").exists());
}

#[tokio::test]
async fn shutdown_before_start_issues_no_requests() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new().on("/v7/finance/download/AAPL", Scripted::ok(EXPORT_CSV)));

    let reports = service(dir.path(), &["AAPL"], &fetcher)
        .with_shutdown(Arc::new(AtomicBool::new(true)))
        .run()
        .await;

    assert!(reports.is_empty());
    assert!(fetcher.requests().is_empty());
}
