use crate::parsers::selector;
use log::debug;
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

const TABULAR_HEADER_PREFIX: &str = "Date,Open,High,Low,Close";
const CHART_PATH: &str = "/chart/result/0";
const CONVERSATION_PATH: &str = "/context/dispatcher/stores/ConversationStore";

/// 请求方期望的格式，只用于推断失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredFormat {
    Csv,
    Json,
    Html,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHints {
    pub declared_format: Option<DeclaredFormat>,
}

impl ContentHints {
    pub fn declared(format: DeclaredFormat) -> Self {
        Self {
            declared_format: Some(format),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnrecognizedReason {
    Empty,
    NotText,
    /// 结构检查都失败后，看起来像错误页（HTML 或含 "error"）
    ErrorPage,
    UnknownShape,
}

/// 已识别的响应格式
#[derive(Debug, Clone, PartialEq)]
pub enum Shape<'a> {
    TabularPriceExport(&'a str),
    ChartTimeSeries(Value),
    ConversationJson(Value),
    LegacyBoardHtml(&'a str),
    LegacyMessageDetail(&'a str),
    Unrecognized(UnrecognizedReason),
}

impl Shape<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Shape::TabularPriceExport(_) => "tabular-price-export",
            Shape::ChartTimeSeries(_) => "chart-time-series",
            Shape::ConversationJson(_) => "conversation-json",
            Shape::LegacyBoardHtml(_) => "legacy-board-html",
            Shape::LegacyMessageDetail(_) => "legacy-message-detail",
            Shape::Unrecognized(_) => "unrecognized",
        }
    }
}

impl fmt::Display for UnrecognizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnrecognizedReason::Empty => "empty body",
            UnrecognizedReason::NotText => "body is not UTF-8 text",
            UnrecognizedReason::ErrorPage => "body looks like an error page",
            UnrecognizedReason::UnknownShape => "body matches no known shape",
        };
        f.write_str(text)
    }
}

fn app_state_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"root\.App\.main\s*=\s*(\{.*\});").expect("valid regex"))
}

/// 判断响应体属于哪种已知格式
///
/// 结构检查按顺序进行：CSV 表头、chart JSON、ConversationStore JSON
/// （含嵌在页面脚本里的 app state）、旧版讨论区列表、旧版消息详情页。
/// 只有全部结构检查失败后才用关键字猜测是否为错误页。
pub fn classify<'a>(body: &'a [u8], hints: &ContentHints) -> Shape<'a> {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(_) => return Shape::Unrecognized(UnrecognizedReason::NotText),
    };
    if text.trim().is_empty() {
        return Shape::Unrecognized(UnrecognizedReason::Empty);
    }

    if has_tabular_header(text) {
        return Shape::TabularPriceExport(text);
    }

    if let Ok(json) = serde_json::from_str::<Value>(text) {
        if has_path(&json, CHART_PATH) {
            return Shape::ChartTimeSeries(json);
        }
        if has_path(&json, CONVERSATION_PATH) {
            return Shape::ConversationJson(json);
        }
    } else if looks_like_html(text) {
        if let Some(state) = embedded_app_state(text) {
            if has_path(&state, CONVERSATION_PATH) {
                return Shape::ConversationJson(state);
            }
        }

        let document = Html::parse_document(text);
        if document.select(&selector("table.msglist")).next().is_some() {
            return Shape::LegacyBoardHtml(text);
        }
        if document.select(&selector("div#message")).next().is_some() {
            return Shape::LegacyMessageDetail(text);
        }
    }

    let reason = guess_failure(text, hints);
    debug!("Unrecognized response ({}, expected {:?})", reason, hints.declared_format);
    Shape::Unrecognized(reason)
}

fn has_tabular_header(text: &str) -> bool {
    let text = text.trim_start_matches('\u{feff}');
    let first_line = text.lines().next().unwrap_or_default().trim_end_matches('\r');
    first_line.starts_with(TABULAR_HEADER_PREFIX)
}

fn has_path(json: &Value, pointer: &str) -> bool {
    json.pointer(pointer).is_some_and(|v| !v.is_null())
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(512).collect::<String>().to_lowercase();
    head.starts_with('<') || head.contains("<html")
}

fn embedded_app_state(html: &str) -> Option<Value> {
    let caps = app_state_regex().captures(html)?;
    serde_json::from_str(&caps[1]).ok()
}

// 结构检查已全部失败，这里只是猜测原因
fn guess_failure(text: &str, hints: &ContentHints) -> UnrecognizedReason {
    if looks_like_html(text) && hints.declared_format != Some(DeclaredFormat::Html) {
        return UnrecognizedReason::ErrorPage;
    }
    if text.to_lowercase().contains("error") {
        return UnrecognizedReason::ErrorPage;
    }
    UnrecognizedReason::UnknownShape
}
