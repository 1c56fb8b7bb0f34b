use crate::errors::{HarvestError, Result};
use crate::models::record::DateRange;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

/// 闭区间判断，两端都包含
pub fn in_range(ts: &NaiveDateTime, range: &DateRange) -> bool {
    range.contains(ts)
}

// 带时刻的常见格式，按尝试顺序排列；两位年份必须排在四位年份之前
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
    "%d-%b-%y %I:%M %p",
    "%d-%b-%Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%a %b %d, %Y %I:%M %p",
    "%A, %B %d, %Y %I:%M %p",
    "%a, %d %b %Y %H:%M:%S",
    "%a %b %d %H:%M:%S %Y",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%d-%b-%y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%a %b %d, %Y",
];

fn tz_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s+(?:EDT|EST|CDT|CST|MDT|MST|PDT|PST|ET|PT|UTC|GMT)$").expect("valid regex")
    })
}

fn relative_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+|an?|one)\s*(s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?|d|days?|w|wks?|weeks?)(?:\s+ago)?$")
            .expect("valid regex")
    })
}

/// 通用日期解析
///
/// 依次尝试 RFC 3339、RFC 2822、HTTP-date、常见的无时区格式以及
/// "3 hours ago" / "yesterday" 这类相对时间。带时区的时间统一换算成 UTC，
/// 无时区的时间原样返回。`now` 作为相对时间的参照点。
pub fn parse_datetime(text: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HarvestError::DateError("empty date string".to_string()));
    }

    if let Some(ts) = parse_relative(text, now) {
        return Ok(ts);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Ok(dt.naive_utc());
    }
    if let Ok(system_time) = httpdate::parse_http_date(text) {
        return Ok(DateTime::<Utc>::from(system_time).naive_utc());
    }

    let stripped = tz_suffix_regex().replace(text, "");
    let stripped = stripped.trim();

    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(stripped, format) {
            return Ok(ts);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(stripped, format) {
            return Ok(date.and_time(NaiveTime::MIN));
        }
    }

    Err(HarvestError::DateError(format!("unrecognized date '{}'", text)))
}

fn parse_relative(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let lower = text.to_lowercase();
    match lower.as_str() {
        "now" | "just now" => return Some(now),
        "today" => return Some(now.date().and_time(NaiveTime::MIN)),
        "yesterday" => return Some((now.date() - Duration::days(1)).and_time(NaiveTime::MIN)),
        _ => {}
    }

    let caps = relative_regex().captures(&lower)?;
    let amount: i64 = match &caps[1] {
        "a" | "an" | "one" => 1,
        n => n.parse().ok()?,
    };
    let unit = &caps[2];
    // 超出 chrono 可表示范围的数量视为无法解析
    let delta = match unit.chars().next()? {
        's' => Duration::try_seconds(amount)?,
        'm' => Duration::try_minutes(amount)?,
        'h' => Duration::try_hours(amount)?,
        'd' => Duration::try_days(amount)?,
        'w' => Duration::try_weeks(amount)?,
        _ => return None,
    };
    now.checked_sub_signed(delta)
}

/// 把 Unix 秒转换成指定时区的本地时间
pub fn epoch_to_local(secs: i64, tz: &Tz) -> Option<NaiveDateTime> {
    tz.timestamp_opt(secs, 0).single().map(|dt| dt.naive_local())
}

/// Unix 秒或毫秒转 UTC 时间，数值大于 1e11 时按毫秒处理
pub fn epoch_to_utc(value: i64) -> Option<NaiveDateTime> {
    let secs = if value.unsigned_abs() > 100_000_000_000 { value / 1000 } else { value };
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// 请求参数里使用的 Unix 秒，按 UTC 解释
pub fn to_epoch_secs(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp()
}
