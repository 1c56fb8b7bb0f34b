use crate::errors::{HarvestError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// 闭区间日期范围，进程启动时确定后不再改变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if start > end {
            return Err(HarvestError::Config(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// 按整天构造：起始日 00:00:00 到结束日 23:59:59
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        Self::new(start_of_day(start), end_of_day(end))
    }

    /// Caller guarantees `start <= end`.
    pub(crate) fn spanning_days(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start_of_day(start),
            end: end_of_day(end),
        }
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.start <= *ts && *ts <= self.end
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::seconds(86_399)
}

/// 日线行情
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: u64,
}

/// 讨论区主贴
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub symbol: String,
    pub message_id: String,
    pub author: String,
    pub content: Option<String>,
    pub created_at: NaiveDateTime,
    pub like_count: u64,
    pub reply_count: u64,
}

/// 回复，`parent_id` 只按 id 弱引用主贴
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub symbol: String,
    pub reply_id: String,
    pub parent_id: String,
    pub author: String,
    pub content: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Reply {
    pub fn reply_id_for(parent_id: &str, index: usize) -> String {
        format!("{}_{}", parent_id, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = DateRange::new(ts("2023-01-01 00:00:00"), ts("2023-01-03 00:00:00")).unwrap();
        assert!(range.contains(&ts("2023-01-01 00:00:00")));
        assert!(range.contains(&ts("2023-01-03 00:00:00")));
        assert!(range.contains(&ts("2023-01-02 12:30:00")));
        assert!(!range.contains(&ts("2022-12-31 23:59:59")));
        assert!(!range.contains(&ts("2023-01-03 00:00:01")));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(DateRange::new(ts("2023-01-03 00:00:00"), ts("2023-01-01 00:00:00")).is_err());
    }

    #[test]
    fn whole_day_range_covers_the_last_second() {
        let d = NaiveDate::from_ymd_opt(2013, 7, 19).unwrap();
        let range = DateRange::from_dates(d, d).unwrap();
        assert!(range.contains(&ts("2013-07-19 23:59:59")));
        assert!(!range.contains(&ts("2013-07-20 00:00:00")));
    }

    #[test]
    fn message_serializes_snake_case_fields() {
        let message = Message {
            symbol: "AAPL".into(),
            message_id: "42".into(),
            author: ANONYMOUS_AUTHOR.into(),
            content: None,
            created_at: ts("2013-07-19 16:35:00"),
            like_count: 0,
            reply_count: 0,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["message_id"], "42");
        assert_eq!(value["created_at"], "2013-07-19T16:35:00");
        assert!(value["content"].is_null());
        assert_eq!(Reply::reply_id_for("42", 3), "42_3");
    }
}
