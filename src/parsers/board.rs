use crate::models::record::{Message, Reply, ANONYMOUS_AUTHOR};
use crate::parsers::{joined_text, selector, ExtractContext, Extraction, RecordError};
use crate::util;
use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde_json::Value;
use std::sync::OnceLock;

const MESSAGES_PATH: &str = "/context/dispatcher/stores/ConversationStore/messages";

fn message_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"mid=(\d+)").expect("valid regex"))
}

fn reply_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((.*?)\)").expect("valid regex"))
}

/// 旧版讨论区列表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub message_id: String,
    /// 列表里的标题，只用于日志，不写入 Message
    pub subject: String,
    pub author: String,
    pub created_at: NaiveDateTime,
}

impl ListingEntry {
    /// 没有详情页时，只用列表信息生成主贴
    pub fn to_message(&self, symbol: &str) -> Message {
        Message {
            symbol: symbol.to_string(),
            message_id: self.message_id.clone(),
            author: self.author.clone(),
            content: None,
            created_at: self.created_at,
            like_count: 0,
            reply_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListingPage {
    pub entries: Extraction<ListingEntry>,
    pub next_href: Option<String>,
    /// 日期可解析的行数
    pub dated_rows: usize,
    /// 早于区间起点的行数
    pub rows_before_range: usize,
}

impl ListingPage {
    /// 列表按时间倒序，整页都早于区间起点时不必再翻页
    pub fn is_past_range(&self) -> bool {
        self.dated_rows > 0 && self.rows_before_range == self.dated_rows
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDetail {
    pub message: Message,
    pub replies: Extraction<Reply>,
}

/// 从 ConversationStore 中提取主贴，区间外的消息静默丢弃
pub fn extract_conversation(json: &Value, ctx: &ExtractContext<'_>) -> Extraction<Message> {
    let mut extraction = Extraction::default();
    let messages = match json.pointer(MESSAGES_PATH).and_then(Value::as_array) {
        Some(messages) => messages,
        None => return extraction,
    };

    for (index, msg) in messages.iter().enumerate() {
        let message_id = match msg.get("messageId").and_then(scalar_to_string) {
            Some(id) => id,
            None => {
                extraction.errors.push(RecordError::new(index, "missing messageId"));
                continue;
            }
        };

        let created_at = match msg.get("created_at") {
            Some(Value::String(text)) => util::parse_datetime(text, ctx.now).map_err(|e| e.to_string()),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(util::epoch_to_utc)
                .ok_or_else(|| format!("invalid epoch {}", n)),
            _ => Err("missing created_at".to_string()),
        };
        let created_at = match created_at {
            Ok(ts) => ts,
            Err(reason) => {
                extraction
                    .errors
                    .push(RecordError::new(index, format!("message {}: {}", message_id, reason)));
                continue;
            }
        };
        if !util::in_range(&created_at, &ctx.range) {
            continue;
        }

        let author = msg
            .pointer("/author/username")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(ANONYMOUS_AUTHOR)
            .to_string();

        extraction.records.push(Message {
            symbol: ctx.symbol.to_string(),
            message_id,
            author,
            content: msg.get("content").and_then(Value::as_str).map(str::to_string),
            created_at,
            like_count: msg.get("likes_count").and_then(Value::as_u64).unwrap_or(0),
            reply_count: msg.get("replies_count").and_then(Value::as_u64).unwrap_or(0),
        });
    }

    extraction
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(element: ElementRef<'_>, css: &'static str) -> Option<String> {
    element
        .select(&selector(css))
        .next()
        .map(joined_text)
        .filter(|text| !text.is_empty())
}

/// 解析旧版讨论区列表页（`table.msglist`）
///
/// 含 `th` 的表头行和没有标题的分隔行直接跳过；缺少 id 或日期的行记为错误。
pub fn extract_legacy_listing(html: &str, ctx: &ExtractContext<'_>) -> ListingPage {
    let document = Html::parse_document(html);
    let mut page = ListingPage::default();

    let header_cell = selector("th");
    let subject_link = selector("td.subject a");

    for (index, row) in document.select(&selector("table.msglist tr")).enumerate() {
        if row.select(&header_cell).next().is_some() {
            continue;
        }

        let link = match row.select(&subject_link).next() {
            Some(link) => link,
            None => continue,
        };
        let subject = joined_text(link);
        if subject.is_empty() {
            continue;
        }

        let message_id = match link
            .value()
            .attr("href")
            .and_then(|href| message_id_regex().captures(href))
        {
            Some(caps) => caps[1].to_string(),
            None => {
                page.entries
                    .errors
                    .push(RecordError::new(index, format!("no message id for '{}'", subject)));
                continue;
            }
        };

        let author = first_text(row, "td.author a").unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());

        let created_at = match first_text(row, "td.date") {
            Some(text) => match util::parse_datetime(&text, ctx.now) {
                Ok(ts) => ts,
                Err(e) => {
                    page.entries
                        .errors
                        .push(RecordError::new(index, format!("message {}: {}", message_id, e)));
                    continue;
                }
            },
            None => {
                page.entries
                    .errors
                    .push(RecordError::new(index, format!("message {}: missing date", message_id)));
                continue;
            }
        };

        page.dated_rows += 1;
        if created_at < ctx.range.start {
            page.rows_before_range += 1;
        }
        if !util::in_range(&created_at, &ctx.range) {
            continue;
        }

        page.entries.records.push(ListingEntry {
            message_id,
            subject,
            author,
            created_at,
        });
    }

    page.next_href = document
        .select(&selector("a"))
        .find(|a| a.text().any(|t| t.contains("Next")))
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    page
}

/// 解析旧版消息详情页：正文和回复列表
///
/// 回复 id 为 `{parent_id}_{index}`，index 只对日期可解析且在区间内的回复计数。
pub fn extract_legacy_detail(html: &str, entry: &ListingEntry, ctx: &ExtractContext<'_>) -> MessageDetail {
    let document = Html::parse_document(html);

    let content = document
        .select(&selector("div#message div.msgbody"))
        .map(joined_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let mut replies = Extraction::default();
    let body_selector = selector("div.msgbody");
    let byuser_selector = selector("div.byuser");
    let mut next_index = 0;

    for (position, item) in document.select(&selector("ul.msglist li")).enumerate() {
        let author = first_text(item, "div.byuser span.username").unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());

        // 只看 div.byuser 自身的文本节点，用户名里的括号不参与日期匹配
        let byline = item
            .select(&byuser_selector)
            .next()
            .map(|byuser| {
                byuser
                    .children()
                    .filter_map(|node| node.value().as_text())
                    .map(|text| text.trim())
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let date_text = match reply_date_regex().captures(&byline) {
            Some(caps) => caps[1].to_string(),
            None => {
                replies
                    .errors
                    .push(RecordError::new(position, format!("reply to {}: missing date", entry.message_id)));
                continue;
            }
        };
        let created_at = match util::parse_datetime(&date_text, ctx.now) {
            Ok(ts) => ts,
            Err(e) => {
                replies
                    .errors
                    .push(RecordError::new(position, format!("reply to {}: {}", entry.message_id, e)));
                continue;
            }
        };
        if !util::in_range(&created_at, &ctx.range) {
            continue;
        }

        let text = item
            .select(&body_selector)
            .map(joined_text)
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        replies.records.push(Reply {
            symbol: ctx.symbol.to_string(),
            reply_id: Reply::reply_id_for(&entry.message_id, next_index),
            parent_id: entry.message_id.clone(),
            author,
            content: Some(text).filter(|t| !t.is_empty()),
            created_at,
        });
        next_index += 1;
    }

    let mut message = entry.to_message(ctx.symbol);
    message.content = Some(content).filter(|c| !c.is_empty());
    message.reply_count = replies.records.len() as u64;

    MessageDetail { message, replies }
}
