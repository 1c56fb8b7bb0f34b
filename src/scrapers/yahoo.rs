use crate::errors::Result;
use crate::models::fetch::{FetchRequest, Strategy};
use crate::models::record::DateRange;
use crate::util;
use url::Url;

const DOWNLOAD_BASE: &str = "https://query1.finance.yahoo.com/v7/finance/download/";
const CHART_BASE: &str = "https://query1.finance.yahoo.com/v8/finance/chart/";
const QUOTE_BASE: &str = "https://finance.yahoo.com/quote/";
const LEGACY_BOARD_BASE: &str = "https://messages.finance.yahoo.com/mb/";

fn history_referer(symbol: &str) -> String {
    format!("{}{}/history?p={}", QUOTE_BASE, symbol, symbol)
}

fn community_url(symbol: &str) -> String {
    format!("{}{}/community?p={}", QUOTE_BASE, symbol, symbol)
}

fn period_params(range: &DateRange) -> Vec<(&'static str, String)> {
    vec![
        ("period1", util::to_epoch_secs(&range.start).to_string()),
        ("period2", util::to_epoch_secs(&range.end).to_string()),
        ("interval", "1d".to_string()),
        ("events", "history".to_string()),
        ("includeAdjustedClose", "true".to_string()),
    ]
}

/// 主策略：CSV 直接导出，时间范围编码在请求参数里
pub fn tabular_export_request(symbol: &str, range: &DateRange) -> Result<FetchRequest> {
    let mut params = period_params(range);
    params.push(("download", "true".to_string()));
    let url = Url::parse_with_params(&format!("{}{}", DOWNLOAD_BASE, symbol), &params)?;

    Ok(FetchRequest {
        symbol: symbol.to_string(),
        strategy: Strategy::TabularExport,
        url: url.to_string(),
        referer: history_referer(symbol),
    })
}

/// 备用策略：chart JSON 时间序列
pub fn chart_request(symbol: &str, range: &DateRange) -> Result<FetchRequest> {
    let url = Url::parse_with_params(&format!("{}{}", CHART_BASE, symbol), &period_params(range))?;

    Ok(FetchRequest {
        symbol: symbol.to_string(),
        strategy: Strategy::ChartTimeSeries,
        url: url.to_string(),
        referer: history_referer(symbol),
    })
}

pub fn community_request(symbol: &str) -> FetchRequest {
    FetchRequest {
        symbol: symbol.to_string(),
        strategy: Strategy::CommunityConversation,
        url: community_url(symbol),
        referer: format!("{}{}?p={}", QUOTE_BASE, symbol, symbol),
    }
}

pub fn legacy_board_request(symbol: &str) -> FetchRequest {
    legacy_page_request(symbol, format!("{}{}", LEGACY_BOARD_BASE, symbol))
}

/// 旧版讨论区的翻页请求，url 已经是绝对地址
pub fn legacy_page_request(symbol: &str, url: String) -> FetchRequest {
    FetchRequest {
        symbol: symbol.to_string(),
        strategy: Strategy::LegacyBoard,
        url,
        referer: community_url(symbol),
    }
}

pub fn legacy_message_request(symbol: &str, message_id: &str) -> FetchRequest {
    FetchRequest {
        symbol: symbol.to_string(),
        strategy: Strategy::LegacyMessageDetail,
        url: format!("{}{}/message/{}", LEGACY_BOARD_BASE, symbol, message_id),
        referer: format!("{}{}", LEGACY_BOARD_BASE, symbol),
    }
}

/// 把页面里的相对链接解析成绝对地址
pub fn resolve_link(base: &str, href: &str) -> Result<String> {
    let base = Url::parse(base)?;
    Ok(base.join(href)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::from_dates(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn tabular_request_encodes_range_and_flags() {
        let request = tabular_export_request("AAPL", &range()).unwrap();
        let url = Url::parse(&request.url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/v7/finance/download/AAPL");
        assert!(pairs.contains(&("period1".into(), "1672531200".into())));
        assert!(pairs.contains(&("period2".into(), "1672790399".into())));
        assert!(pairs.contains(&("interval".into(), "1d".into())));
        assert!(pairs.contains(&("events".into(), "history".into())));
        assert!(pairs.contains(&("includeAdjustedClose".into(), "true".into())));
        assert!(pairs.contains(&("download".into(), "true".into())));
        assert_eq!(request.referer, "https://finance.yahoo.com/quote/AAPL/history?p=AAPL");
        assert_eq!(request.strategy, Strategy::TabularExport);
    }

    #[test]
    fn chart_request_shares_temporal_parameters() {
        let request = chart_request("MSFT", &range()).unwrap();
        assert!(request.url.starts_with("https://query1.finance.yahoo.com/v8/finance/chart/MSFT?"));
        assert!(request.url.contains("period1=1672531200"));
        assert!(!request.url.contains("download"));
    }

    #[test]
    fn relative_links_resolve_against_page() {
        let next = resolve_link("https://messages.finance.yahoo.com/mb/AAPL", "/mb/AAPL?start=20").unwrap();
        assert_eq!(next, "https://messages.finance.yahoo.com/mb/AAPL?start=20");
        let detail = legacy_message_request("AAPL", "123");
        assert_eq!(detail.url, "https://messages.finance.yahoo.com/mb/AAPL/message/123");
    }
}
