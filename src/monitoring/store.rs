//! Report Store
//!
//! 生成済みレポートのキー付き保存。ID はアトミックカウンタで採番し、
//! 件数上限と保持期間で古いレポートを破棄する。

use super::report::{Report, ReportSummary};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 保持ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// 保持する最大件数（超過分は古い順に破棄）
    pub max_reports: usize,
    /// 保持期間（秒）
    pub max_age_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_reports: 100,
            max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl RetentionPolicy {
    fn max_age(&self) -> Duration {
        Duration::seconds(self.max_age_secs.min((i64::MAX / 1000) as u64) as i64)
    }

    fn is_expired(&self, report: &Report, now: DateTime<Utc>) -> bool {
        now - report.created_at > self.max_age()
    }
}

/// インメモリのレポートストア
///
/// Callers only ever receive clones; the store is the sole owner of the
/// persisted values.
pub struct ReportStore {
    next_id: AtomicU64,
    reports: RwLock<HashMap<String, Report>>,
    retention: RetentionPolicy,
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl ReportStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            reports: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// 新しいレポート ID を採番（`report-00000001` 形式）
    pub fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("report-{:08}", n)
    }

    /// レポートを保存し ID を返す
    pub async fn put(&self, report: Report) -> Result<String> {
        let now = Utc::now();
        let mut reports = self.reports.write().await;

        if reports.contains_key(&report.report_id) {
            return Err(Error::Internal(format!(
                "report id {} already exists",
                report.report_id
            )));
        }

        let retention = self.retention;
        let before = reports.len();
        reports.retain(|_, existing| !retention.is_expired(existing, now));
        if reports.len() < before {
            debug!("Pruned {} expired reports", before - reports.len());
        }

        let id = report.report_id.clone();
        reports.insert(id.clone(), report);

        while reports.len() > retention.max_reports.max(1) {
            let Some(oldest) = reports
                .values()
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.report_id.cmp(&b.report_id))
                })
                .map(|r| r.report_id.clone())
            else {
                break;
            };
            reports.remove(&oldest);
            info!("Evicted report {} (store limit {})", oldest, retention.max_reports);
        }

        info!("Stored report {} ({} reports retained)", id, reports.len());
        Ok(id)
    }

    /// ID でレポートを取得
    pub async fn get(&self, report_id: &str) -> Result<Report> {
        let now = Utc::now();
        let reports = self.reports.read().await;
        reports
            .get(report_id)
            .filter(|report| !self.retention.is_expired(report, now))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("performance report '{}'", report_id)))
    }

    /// レポート一覧（作成日時の降順、最大 `limit` 件）
    pub async fn list(&self, resource_id: Option<&str>, limit: usize) -> Vec<ReportSummary> {
        let now = Utc::now();
        let reports = self.reports.read().await;
        let mut summaries: Vec<ReportSummary> = reports
            .values()
            .filter(|report| !self.retention.is_expired(report, now))
            .filter(|report| resource_id.map_or(true, |id| report.resource_id == id))
            .map(Report::summary)
            .collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.report_id.cmp(&a.report_id))
        });
        summaries.truncate(limit);
        summaries
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::report::Section;
    use crate::monitoring::types::{Tags, TimeWindow};
    use std::sync::Arc;

    fn report(id: &str, resource: &str, created_at: DateTime<Utc>) -> Report {
        Report {
            report_id: id.to_string(),
            resource_id: resource.to_string(),
            window: TimeWindow::ending_at(created_at, Duration::hours(1)).unwrap(),
            created_at,
            metrics: Vec::new(),
            findings: Section::omitted("not collected"),
            logs: Section::omitted("not collected"),
            tags: Tags::new(),
        }
    }

    #[tokio::test]
    async fn test_put_get_and_collision() {
        let store = ReportStore::default();
        let id = store.allocate_id();
        assert_eq!(id, "report-00000001");

        let stored = report(&id, "db-1", Utc::now());
        store.put(stored.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), stored);

        let err = store.put(stored).await.unwrap_err();
        assert_eq!(err.kind(), "internal_error");
        assert!(matches!(store.get("report-99999999").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_filtered() {
        let store = ReportStore::default();
        let now = Utc::now();
        store.put(report("report-00000001", "db-1", now - Duration::hours(2))).await.unwrap();
        store.put(report("report-00000002", "db-2", now - Duration::hours(1))).await.unwrap();
        store.put(report("report-00000003", "db-1", now)).await.unwrap();

        let all: Vec<String> = store.list(None, 10).await.into_iter().map(|s| s.report_id).collect();
        assert_eq!(all, vec!["report-00000003", "report-00000002", "report-00000001"]);

        let db1 = store.list(Some("db-1"), 1).await;
        assert_eq!(db1.len(), 1);
        assert_eq!(db1[0].report_id, "report-00000003");
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_and_expired() {
        let store = ReportStore::new(RetentionPolicy {
            max_reports: 2,
            max_age_secs: 3600,
        });
        let now = Utc::now();
        store.put(report("old", "db-1", now - Duration::hours(2))).await.unwrap();
        assert!(matches!(store.get("old").await, Err(Error::NotFound(_))));

        store.put(report("a", "db-1", now - Duration::minutes(3))).await.unwrap();
        store.put(report("b", "db-1", now - Duration::minutes(2))).await.unwrap();
        store.put(report("c", "db-1", now - Duration::minutes(1))).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.get("a").await.is_err());
        assert!(store.get("c").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let store = Arc::new(ReportStore::default());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.allocate_id() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
    }
}
