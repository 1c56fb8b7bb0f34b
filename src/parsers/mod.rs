//! 响应分类与各格式的解析器
//!
//! 解析器都是纯函数：输入为已分类的响应体和 [`ExtractContext`]，输出记录序列
//! 以及逐条记录的错误。单条记录出错只会跳过该记录，不会中断整批解析。

pub mod board;
pub mod classifier;
pub mod price;

use crate::models::record::DateRange;
use chrono::NaiveDateTime;
use scraper::Selector;
use std::fmt;

/// 解析时需要的上下文
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub symbol: &'a str,
    pub range: DateRange,
    /// 相对时间（"3 hours ago"）的参照点
    pub now: NaiveDateTime,
}

/// 单条记录的解析错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub index: usize,
    pub reason: String,
}

impl RecordError {
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record #{}: {}", self.index, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction<T> {
    pub records: Vec<T>,
    pub errors: Vec<RecordError>,
}

impl<T> Default for Extraction<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static CSS selector")
}

/// 收集元素下所有文本节点，用空格连接后去掉首尾空白
pub(crate) fn joined_text(element: scraper::ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}
