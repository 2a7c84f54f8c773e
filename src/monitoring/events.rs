//! RDS Events
//!
//! RDS イベント（メンテナンス、フェイルオーバー、バックアップなど）の取得

use super::types::{parse_timestamp, TimeWindow};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `duration` 指定の上限（14 日）
pub const MAX_EVENT_DURATION_MINUTES: i64 = 20_160;
/// 期間未指定時のデフォルト（直近 1 時間）
pub const DEFAULT_EVENT_DURATION_MINUTES: i64 = 60;

/// イベント発生源の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSourceType {
    DbInstance,
    DbParameterGroup,
    DbSecurityGroup,
    DbSnapshot,
    DbCluster,
    DbClusterSnapshot,
    CustomEngineVersion,
    DbProxy,
    BlueGreenDeployment,
}

impl EventSourceType {
    pub const ALL: [&'static str; 9] = [
        "db-instance",
        "db-parameter-group",
        "db-security-group",
        "db-snapshot",
        "db-cluster",
        "db-cluster-snapshot",
        "custom-engine-version",
        "db-proxy",
        "blue-green-deployment",
    ];
}

/// RDS イベント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdsEvent {
    pub source_identifier: String,
    pub source_type: EventSourceType,
    pub message: String,
    #[serde(default)]
    pub event_categories: Vec<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub source_arn: Option<String>,
}

/// 上流へのイベント問い合わせ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    pub source_identifier: String,
    pub source_type: EventSourceType,
    pub categories: Vec<String>,
    pub window: TimeWindow,
}

impl EventQuery {
    pub fn matches(&self, event: &RdsEvent) -> bool {
        event.source_identifier == self.source_identifier
            && event.source_type == self.source_type
            && self.window.contains_instant(event.date)
            && (self.categories.is_empty()
                || event
                    .event_categories
                    .iter()
                    .any(|c| self.categories.iter().any(|wanted| wanted == c)))
    }
}

/// ツール引数から組み立てるイベントフィルタ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub source_identifier: String,
    pub source_type: EventSourceType,
    #[serde(default)]
    pub event_categories: Vec<String>,
    /// 直近何分間か（`start_time`/`end_time` と排他）
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl EventFilter {
    /// 問い合わせに変換する。I/O 前に期間指定を検証する
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<EventQuery> {
        let has_range = self.start_time.is_some() || self.end_time.is_some();
        let window = match (self.duration, has_range) {
            (Some(_), true) => {
                return Err(Error::InvalidParams(
                    "duration cannot be combined with start_time/end_time".into(),
                ))
            }
            (Some(minutes), false) => {
                if !(1..=MAX_EVENT_DURATION_MINUTES).contains(&minutes) {
                    return Err(Error::InvalidParams(format!(
                        "duration must be between 1 and {} minutes",
                        MAX_EVENT_DURATION_MINUTES
                    )));
                }
                TimeWindow::ending_at(now, Duration::minutes(minutes))?
            }
            (None, true) => {
                let end = match &self.end_time {
                    Some(value) => parse_timestamp(value)?,
                    None => now,
                };
                let start = match &self.start_time {
                    Some(value) => parse_timestamp(value)?,
                    None => end - Duration::minutes(DEFAULT_EVENT_DURATION_MINUTES),
                };
                TimeWindow::new(start, end)?
            }
            (None, false) => {
                TimeWindow::ending_at(now, Duration::minutes(DEFAULT_EVENT_DURATION_MINUTES))?
            }
        };

        Ok(EventQuery {
            source_identifier: self.source_identifier.clone(),
            source_type: self.source_type,
            categories: self.event_categories.clone(),
            window,
        })
    }
}

/// イベント取得結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventList {
    pub source_identifier: String,
    pub source_type: EventSourceType,
    pub events: Vec<RdsEvent>,
    pub count: usize,
}

/// イベント提供元（外部コラボレーター）
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn describe_events(&self, query: &EventQuery) -> Result<Vec<RdsEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn filter() -> EventFilter {
        EventFilter {
            source_identifier: "db-1".into(),
            source_type: EventSourceType::DbInstance,
            event_categories: Vec::new(),
            duration: None,
            start_time: None,
            end_time: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_duration_and_range_are_exclusive() {
        let f = EventFilter {
            duration: Some(30),
            start_time: Some("2025-06-01T00:00:00Z".into()),
            ..filter()
        };
        assert!(matches!(f.resolve(now()), Err(Error::InvalidParams(_))));
    }

    #[test]
    fn test_duration_limit() {
        let too_long = EventFilter {
            duration: Some(MAX_EVENT_DURATION_MINUTES + 1),
            ..filter()
        };
        assert!(too_long.resolve(now()).is_err());

        let ok = EventFilter {
            duration: Some(MAX_EVENT_DURATION_MINUTES),
            ..filter()
        };
        let query = ok.resolve(now()).unwrap();
        assert_eq!(query.window.duration(), Duration::days(14));
    }

    #[test]
    fn test_default_window_is_last_hour() {
        let query = filter().resolve(now()).unwrap();
        assert_eq!(query.window.end(), now());
        assert_eq!(query.window.duration(), Duration::hours(1));
    }

    #[test]
    fn test_category_matching() {
        let query = EventFilter {
            event_categories: vec!["backup".into()],
            duration: Some(120),
            ..filter()
        }
        .resolve(now())
        .unwrap();

        let event = RdsEvent {
            source_identifier: "db-1".into(),
            source_type: EventSourceType::DbInstance,
            message: "Backing up DB instance".into(),
            event_categories: vec!["backup".into()],
            date: now() - Duration::minutes(30),
            source_arn: None,
        };
        assert!(query.matches(&event));

        let other = RdsEvent {
            event_categories: vec!["failover".into()],
            ..event
        };
        assert!(!query.matches(&other));
    }
}
