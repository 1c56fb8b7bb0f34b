use crate::errors::{HarvestError, Result};
use crate::models::record::PriceRow;
use crate::parsers::{ExtractContext, RecordError};
use crate::util;
use chrono::NaiveDate;
use chrono_tz::Tz;
use log::warn;
use serde::Deserialize;
use serde_json::Value;

/// CSV 导出：按原样落盘，行只做计数和校验
#[derive(Debug, Clone, PartialEq)]
pub struct TabularExport<'a> {
    pub header: Vec<String>,
    pub body: &'a str,
    pub rows: usize,
    pub errors: Vec<RecordError>,
}

impl TabularExport<'_> {
    pub fn payload(&self) -> &[u8] {
        self.body.as_bytes()
    }
}

/// chart 接口解析出的行情，`has_adj_close` 决定是否输出 Adj Close 列
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub rows: Vec<PriceRow>,
    pub has_adj_close: bool,
    pub timezone: Tz,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: Option<ChartMeta>,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "exchangeTimezoneName")]
    exchange_timezone_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// 校验 CSV 导出并原样返回
///
/// 不做日期过滤，数据源已按请求参数限定了区间。格式有问题的行只记为错误。
pub fn extract_tabular(body: &str) -> Result<TabularExport<'_>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.trim_start_matches('\u{feff}').as_bytes());

    let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if header.first().map(String::as_str) != Some("Date") {
        return Err(HarvestError::Classification("missing Date column in CSV header".to_string()));
    }

    let mut rows = 0;
    let mut errors = Vec::new();
    for (index, record) in reader.records().enumerate() {
        rows += 1;
        match record {
            Ok(record) => {
                if record.len() != header.len() {
                    errors.push(RecordError::new(
                        index,
                        format!("expected {} columns, found {}", header.len(), record.len()),
                    ));
                } else if let Err(e) = NaiveDate::parse_from_str(record.get(0).unwrap_or_default(), "%Y-%m-%d") {
                    errors.push(RecordError::new(index, format!("invalid date: {}", e)));
                }
            }
            Err(e) => errors.push(RecordError::new(index, e.to_string())),
        }
    }

    Ok(TabularExport {
        header,
        body,
        rows,
        errors,
    })
}

/// 解析 chart 接口的并行数组
///
/// open 为 null 表示当天无数据，整行静默跳过；其余必填字段缺失记为错误。
/// 时间戳换算到交易所时区的日期，区间外的行丢弃。
pub fn extract_chart(json: Value, ctx: &ExtractContext<'_>, default_tz: Tz) -> Result<ChartSeries> {
    let envelope: ChartEnvelope = serde_json::from_value(json)?;
    let result = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| HarvestError::Classification("chart.result is empty".to_string()))?;

    let timezone = result
        .meta
        .and_then(|meta| meta.exchange_timezone_name)
        .and_then(|name| match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!("[{}] unknown exchange timezone '{}', using {}", ctx.symbol, name, default_tz);
                None
            }
        })
        .unwrap_or(default_tz);

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();
    let has_adj_close = !adjclose.is_empty();

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (i, &secs) in result.timestamp.iter().enumerate() {
        let open = match value_at(&quote.open, i) {
            Some(open) => open,
            None => continue,
        };

        let (high, low, close, volume) = match (
            value_at(&quote.high, i),
            value_at(&quote.low, i),
            value_at(&quote.close, i),
            value_at(&quote.volume, i),
        ) {
            (Some(high), Some(low), Some(close), Some(volume)) => (high, low, close, volume),
            _ => {
                errors.push(RecordError::new(i, "missing high/low/close/volume"));
                continue;
            }
        };
        if volume < 0.0 {
            errors.push(RecordError::new(i, format!("negative volume {}", volume)));
            continue;
        }

        let local = match util::epoch_to_local(secs, &timezone) {
            Some(local) => local,
            None => {
                errors.push(RecordError::new(i, format!("invalid timestamp {}", secs)));
                continue;
            }
        };
        if !util::in_range(&local, &ctx.range) {
            continue;
        }

        rows.push(PriceRow {
            date: local.date(),
            open,
            high,
            low,
            close,
            adj_close: if has_adj_close { value_at(&adjclose, i) } else { None },
            volume: volume.round() as u64,
        });
    }

    Ok(ChartSeries {
        rows,
        has_adj_close,
        timezone,
        errors,
    })
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

/// 行情写成 CSV：Date,Open,High,Low,Close[,Adj Close],Volume
pub fn render_price_csv(rows: &[PriceRow], has_adj_close: bool) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["Date", "Open", "High", "Low", "Close"];
    if has_adj_close {
        header.push("Adj Close");
    }
    header.push("Volume");
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.date.format("%Y-%m-%d").to_string(),
            row.open.to_string(),
            row.high.to_string(),
            row.low.to_string(),
            row.close.to_string(),
        ];
        if has_adj_close {
            record.push(row.adj_close.map(|v| v.to_string()).unwrap_or_default());
        }
        record.push(row.volume.to_string());
        writer.write_record(&record)?;
    }

    writer.into_inner().map_err(|e| HarvestError::IoError(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::DateRange;
    use serde_json::json;

    fn ctx() -> ExtractContext<'static> {
        ExtractContext {
            symbol: "AAPL",
            range: DateRange::from_dates(
                NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 6).unwrap(),
            )
            .unwrap(),
            now: NaiveDate::from_ymd_opt(2023, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    fn new_york() -> Tz {
        chrono_tz::America::New_York
    }

    // 2023-01-03/04/05 09:30 New York
    const TS: [i64; 3] = [1_672_756_200, 1_672_842_600, 1_672_929_000];

    #[test]
    fn tabular_is_byte_identical_passthrough() {
        let body = "Date,Open,High,Low,Close,Adj Close,Volume\n2023-01-03,130.279999,130.899994,124.169998,125.070000,124.216301,112117500\n2023-01-04,126.889999,128.660004,125.080002,126.360001,125.497498,89113600\n";
        let export = extract_tabular(body).unwrap();
        assert_eq!(export.payload(), body.as_bytes());
        assert_eq!(export.rows, 2);
        assert!(export.errors.is_empty());
        assert_eq!(export.header[5], "Adj Close");
    }

    #[test]
    fn tabular_header_only_is_valid() {
        let export = extract_tabular("Date,Open,High,Low,Close,Volume\n").unwrap();
        assert_eq!(export.rows, 0);
    }

    #[test]
    fn tabular_bad_rows_are_reported_not_fatal() {
        let body = "Date,Open,High,Low,Close,Volume\n2023-01-03,1,2,0.5,1.5,100\nnot-a-date,1,2,0.5,1.5,100\n2023-01-05,1\n";
        let export = extract_tabular(body).unwrap();
        assert_eq!(export.rows, 3);
        assert_eq!(export.errors.len(), 2);
        assert_eq!(export.errors[0].index, 1);
        assert_eq!(export.body, body);
    }

    #[test]
    fn null_open_skips_the_whole_row() {
        let chart = json!({"chart": {"result": [{
            "meta": {"exchangeTimezoneName": "America/New_York"},
            "timestamp": TS,
            "indicators": {
                "quote": [{
                    "open": [130.28, null, 126.89],
                    "high": [130.9, 128.0, 128.66],
                    "low": [124.17, 125.0, 125.08],
                    "close": [125.07, 126.0, 126.36],
                    "volume": [112117500, 1, 89113600]
                }],
                "adjclose": [{"adjclose": [124.2, 125.1, 125.5]}]
            }
        }]}});

        let series = extract_chart(chart, &ctx(), new_york()).unwrap();
        assert_eq!(series.rows.len(), 2);
        assert!(series.has_adj_close);
        assert_eq!(series.rows[0].date, NaiveDate::from_ymd_opt(2023, 1, 3).unwrap());
        assert_eq!(series.rows[1].date, NaiveDate::from_ymd_opt(2023, 1, 5).unwrap());
        assert_eq!(series.rows[1].adj_close, Some(125.5));
        assert!(series.errors.is_empty());
    }

    #[test]
    fn missing_adjclose_omits_the_column() {
        let chart = json!({"chart": {"result": [{
            "timestamp": [TS[0]],
            "indicators": {"quote": [{
                "open": [1.5], "high": [2.0], "low": [1.0], "close": [1.75], "volume": [100]
            }]}
        }]}});

        let series = extract_chart(chart, &ctx(), new_york()).unwrap();
        assert!(!series.has_adj_close);
        let csv = String::from_utf8(render_price_csv(&series.rows, series.has_adj_close).unwrap()).unwrap();
        assert_eq!(csv, "Date,Open,High,Low,Close,Volume\n2023-01-03,1.5,2,1,1.75,100\n");
    }

    #[test]
    fn missing_required_field_is_a_record_error() {
        let chart = json!({"chart": {"result": [{
            "timestamp": [TS[0], TS[1]],
            "indicators": {"quote": [{
                "open": [1.0, 2.0], "high": [1.0, null], "low": [1.0, 2.0], "close": [1.0, 2.0], "volume": [1, 2]
            }]}
        }]}});

        let series = extract_chart(chart, &ctx(), new_york()).unwrap();
        assert_eq!(series.rows.len(), 1);
        assert_eq!(series.errors.len(), 1);
        assert_eq!(series.errors[0].index, 1);
    }

    #[test]
    fn rows_outside_range_are_dropped() {
        // 2022-12-30 09:30 New York
        let chart = json!({"chart": {"result": [{
            "timestamp": [1_672_410_600, TS[0]],
            "indicators": {"quote": [{
                "open": [1.0, 2.0], "high": [1.0, 2.0], "low": [1.0, 2.0], "close": [1.0, 2.0], "volume": [1, 2]
            }]}
        }]}});

        let series = extract_chart(chart, &ctx(), new_york()).unwrap();
        assert_eq!(series.rows.len(), 1);
        assert_eq!(series.rows[0].open, 2.0);
    }

    #[test]
    fn csv_render_includes_adj_close_when_present() {
        let rows = vec![PriceRow {
            date: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            adj_close: Some(1.25),
            volume: 10,
        }];
        let csv = String::from_utf8(render_price_csv(&rows, true).unwrap()).unwrap();
        assert_eq!(csv, "Date,Open,High,Low,Close,Adj Close,Volume\n2023-01-03,1,2,0.5,1.5,1.25,10\n");
    }
}
