//! Monitoring Domain Types
//!
//! 監視データの共通型（時間窓、メトリクス系列、待機イベント、所見、ログ抜粋）

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 半開区間 `[start, end)` の UTC 時間窓
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = Error;

    fn try_from(raw: RawTimeWindow) -> Result<Self> {
        TimeWindow::new(raw.start, raw.end)
    }
}

impl TimeWindow {
    /// 時間窓を作成（start < end でなければ InvalidWindow）
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidWindow(format!(
                "start ({}) must be before end ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// 終了時刻から遡った時間窓を作成
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Result<Self> {
        Self::new(end - span, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// `other` がこの窓に完全に含まれるか
    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// この窓が `windows` の和集合で隙間なく覆われているか
    pub fn is_covered_by(&self, windows: &[TimeWindow]) -> bool {
        let mut sorted: Vec<&TimeWindow> = windows.iter().collect();
        sorted.sort_by_key(|w| w.start);

        let mut covered_until = self.start;
        for window in sorted {
            if window.start > covered_until {
                break;
            }
            if window.end > covered_until {
                covered_until = window.end;
            }
            if covered_until >= self.end {
                return true;
            }
        }
        covered_until >= self.end
    }

    /// 長さが `[min, max]` の範囲内か検証
    pub fn ensure_length(&self, min: Duration, max: Duration) -> Result<()> {
        let length = self.duration();
        if length < min || length > max {
            return Err(Error::InvalidWindow(format!(
                "window length {}s must be between {}s and {}s",
                length.num_seconds(),
                min.num_seconds(),
                max.num_seconds()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// タイムスタンプ文字列を UTC 時刻に変換
///
/// Accepts RFC 3339, naive ISO 8601 (treated as UTC), `YYYY-MM-DD`,
/// `MM/DD/YYYY` and unix seconds.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&midnight));
            }
        }
    }
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        if let Some(instant) = value
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        {
            return Ok(instant);
        }
    }

    Err(Error::InvalidParams(format!("invalid timestamp '{}'", value)))
}

/// 省略可能な開始・終了文字列から時間窓を解決する
pub fn resolve_window(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
    default_span: Duration,
) -> Result<TimeWindow> {
    let end = match end {
        Some(value) => parse_timestamp(value)?,
        None => now,
    };
    let start = match start {
        Some(value) => parse_timestamp(value)?,
        None => end - default_span,
    };
    TimeWindow::new(start, end)
}

/// RDS リソース種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Instance,
    Cluster,
    GlobalCluster,
}

impl ResourceType {
    /// CloudWatch のディメンション名
    pub fn dimension_name(&self) -> &'static str {
        match self {
            ResourceType::Instance => "DBInstanceIdentifier",
            ResourceType::Cluster => "DBClusterIdentifier",
            ResourceType::GlobalCluster => "DBClusterIdentifier",
        }
    }

    /// リソース URI 上の種別名 (`db-instance` / `db-cluster`)
    pub fn uri_segment(&self) -> &'static str {
        match self {
            ResourceType::Instance => "db-instance",
            ResourceType::Cluster | ResourceType::GlobalCluster => "db-cluster",
        }
    }

    pub fn from_uri_segment(segment: &str) -> Option<Self> {
        match segment {
            "db-instance" => Some(ResourceType::Instance),
            "db-cluster" => Some(ResourceType::Cluster),
            _ => None,
        }
    }
}

/// メトリクスの単一データポイント
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// 1 リソース・1 メトリクスの時系列（タイムスタンプ昇順）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub resource_id: String,
    pub metric_name: String,
    pub unit: Option<String>,
    /// 実際に問い合わせた時間窓
    pub window: TimeWindow,
    pub points: Vec<DataPoint>,
}

impl MetricSeries {
    /// 系列を作成し、データポイントを昇順に整列する
    pub fn new(
        resource_id: impl Into<String>,
        metric_name: impl Into<String>,
        unit: Option<String>,
        window: TimeWindow,
        mut points: Vec<DataPoint>,
    ) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self {
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            unit,
            window,
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Performance Insights のグループ化ディメンション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "db.wait_event")]
    WaitEvent,
    #[serde(rename = "db.sql")]
    Sql,
    #[serde(rename = "db.sql_tokenized")]
    SqlTokenized,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::WaitEvent => "db.wait_event",
            Dimension::Sql => "db.sql",
            Dimension::SqlTokenized => "db.sql_tokenized",
        }
    }

    pub fn groups_by_sql(&self) -> bool {
        matches!(self, Dimension::Sql | Dimension::SqlTokenized)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 待機イベントのカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitEventCategory {
    Cpu,
    Io,
    Lock,
    Buffer,
    Timeout,
    #[serde(rename = "LWLOCK")]
    LwLock,
    Other,
}

impl WaitEventCategory {
    /// イベント名の接頭辞からカテゴリを判定
    ///
    /// PostgreSQL names look like `IO:DataFileRead`, MySQL names like
    /// `io/table/sql/handler` or `synch/mutex/innodb/...`.
    pub fn from_event_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower == "cpu" || lower.starts_with("cpu:") {
            WaitEventCategory::Cpu
        } else if lower.starts_with("lwlock") {
            WaitEventCategory::LwLock
        } else if lower.starts_with("io:") || lower.starts_with("io/") {
            WaitEventCategory::Io
        } else if lower.starts_with("lock") || lower.starts_with("synch/") {
            WaitEventCategory::Lock
        } else if lower.starts_with("buffer") {
            WaitEventCategory::Buffer
        } else if lower.starts_with("timeout") {
            WaitEventCategory::Timeout
        } else {
            WaitEventCategory::Other
        }
    }
}

/// サンプルに付随するディメンションタグ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTags {
    #[serde(default)]
    pub sql_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

/// 待機イベントのサンプル（負荷寄与のバケット）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitEventSample {
    pub event_name: String,
    pub category: WaitEventCategory,
    /// 平均アクティブセッション数で表した負荷寄与
    pub load: f64,
    #[serde(default)]
    pub tags: SampleTags,
}

impl WaitEventSample {
    pub fn new(event_name: impl Into<String>, load: f64) -> Self {
        let event_name = event_name.into();
        Self {
            category: WaitEventCategory::from_event_name(&event_name),
            event_name,
            load,
            tags: SampleTags::default(),
        }
    }

    pub fn with_sql_id(mut self, sql_id: impl Into<String>) -> Self {
        self.tags.sql_id = Some(sql_id.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.tags.host = Some(host.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.tags.user = Some(user.into());
        self
    }

    /// 負荷値が集計に使えるか（非負かつ有限）
    pub fn has_valid_load(&self) -> bool {
        self.load.is_finite() && self.load >= 0.0
    }
}

/// ランク付けされたボトルネック所見
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rank: u32,
    pub subject: String,
    /// 待機イベント分析の場合のみ設定される
    pub category: Option<WaitEventCategory>,
    pub score: f64,
    pub sample_count: usize,
}

/// ログファイルのフィルタ済み抜粋
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogExcerpt {
    pub log_file_name: String,
    /// 読み取った生ログ行の範囲 `[first_line, end_line)`
    pub first_line: u64,
    pub end_line: u64,
    pub pattern: Option<String>,
    pub lines: Vec<String>,
    /// UTF-8 として不正なためスキップした行数
    pub skipped_lines: usize,
}

impl LogExcerpt {
    pub fn empty(log_file_name: impl Into<String>, offset: u64, pattern: Option<String>) -> Self {
        Self {
            log_file_name: log_file_name.into(),
            first_line: offset,
            end_line: offset,
            pattern,
            lines: Vec::new(),
            skipped_lines: 0,
        }
    }

    pub fn raw_line_count(&self) -> u64 {
        self.end_line - self.first_line
    }
}

/// key/value タグ
pub type Tags = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_window_rejects_empty_and_reversed() {
        assert!(matches!(
            TimeWindow::new(at(0), at(0)),
            Err(Error::InvalidWindow(_))
        ));
        assert!(matches!(
            TimeWindow::new(at(5), at(0)),
            Err(Error::InvalidWindow(_))
        ));
        assert!(TimeWindow::new(at(0), at(5)).is_ok());
    }

    #[test]
    fn test_window_coverage_by_union() {
        let report = TimeWindow::new(at(0), at(30)).unwrap();
        let a = TimeWindow::new(at(0), at(15)).unwrap();
        let b = TimeWindow::new(at(10), at(30)).unwrap();
        let gap = TimeWindow::new(at(20), at(30)).unwrap();

        assert!(report.is_covered_by(&[b, a]));
        assert!(!report.is_covered_by(&[a, gap]));
        assert!(!report.is_covered_by(&[]));
    }

    #[test]
    fn test_window_deserialize_validates() {
        let ok: std::result::Result<TimeWindow, _> = serde_json::from_str(
            r#"{"start":"2025-06-01T10:00:00Z","end":"2025-06-01T10:05:00Z"}"#,
        );
        assert!(ok.is_ok());

        let bad: std::result::Result<TimeWindow, _> = serde_json::from_str(
            r#"{"start":"2025-06-01T10:05:00Z","end":"2025-06-01T10:05:00Z"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-06-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-06-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2025-06-01").unwrap(), expected);
        assert_eq!(parse_timestamp("06/01/2025").unwrap(), expected);
        assert_eq!(
            parse_timestamp(&expected.timestamp().to_string()).unwrap(),
            expected
        );
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_series_points_sorted() {
        let window = TimeWindow::new(at(0), at(10)).unwrap();
        let series = MetricSeries::new(
            "db-1",
            "CPUUtilization",
            Some("Percent".into()),
            window,
            vec![DataPoint::new(at(5), 2.0), DataPoint::new(at(1), 1.0)],
        );
        assert_eq!(series.points[0].timestamp, at(1));
        assert_eq!(series.points[1].timestamp, at(5));
    }

    #[test]
    fn test_category_from_event_name() {
        assert_eq!(WaitEventCategory::from_event_name("CPU"), WaitEventCategory::Cpu);
        assert_eq!(
            WaitEventCategory::from_event_name("IO:DataFileRead"),
            WaitEventCategory::Io
        );
        assert_eq!(
            WaitEventCategory::from_event_name("Lock:transactionid"),
            WaitEventCategory::Lock
        );
        assert_eq!(
            WaitEventCategory::from_event_name("LWLock:BufferMapping"),
            WaitEventCategory::LwLock
        );
        assert_eq!(
            WaitEventCategory::from_event_name("BufferPin:BufferPin"),
            WaitEventCategory::Buffer
        );
        assert_eq!(
            WaitEventCategory::from_event_name("Timeout:PgSleep"),
            WaitEventCategory::Timeout
        );
        assert_eq!(
            WaitEventCategory::from_event_name("io/table/sql/handler"),
            WaitEventCategory::Io
        );
        assert_eq!(
            WaitEventCategory::from_event_name("Client:ClientRead"),
            WaitEventCategory::Other
        );
    }
}
