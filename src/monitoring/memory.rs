//! In-Memory RDS Backend
//!
//! フィクスチャデータで全コラボレータートレイトを実装するバックエンド。
//! テストと `--fixtures` 起動時に使用する。

use super::events::{EventQuery, EventSource, RdsEvent};
use super::inventory::{
    ClusterDetails, ClusterOverview, InstanceDetails, InstanceOverview, InventorySource,
    MetricListItem,
};
use super::logs::{LogFileSummary, LogReader, RawLogPortion};
use super::recommendations::{Recommendation, RecommendationQuery, RecommendationSource};
use super::source::{LoadSampleQuery, MetricQuery, MetricSampleSource};
use super::types::{DataPoint, MetricSeries, ResourceType, WaitEventSample};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// 1 メトリクス分のフィクスチャ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFixture {
    pub resource_id: String,
    pub metric_name: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub points: Vec<DataPoint>,
}

/// 時刻付き負荷サンプル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSampleFixture {
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub sample: WaitEventSample,
}

/// ログファイルのフィクスチャ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFileFixture {
    pub db_instance_identifier: String,
    pub log_file_name: String,
    pub last_written: DateTime<Utc>,
    pub lines: Vec<String>,
}

/// JSON フィクスチャファイルの形式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub instances: Vec<InstanceDetails>,
    pub clusters: Vec<ClusterDetails>,
    pub metrics: Vec<MetricFixture>,
    pub load_samples: Vec<LoadSampleFixture>,
    pub log_files: Vec<LogFileFixture>,
    pub events: Vec<RdsEvent>,
    pub recommendations: Vec<Recommendation>,
}

struct StoredLog {
    db_instance_identifier: String,
    log_file_name: String,
    last_written: DateTime<Utc>,
    lines: Vec<Vec<u8>>,
}

impl StoredLog {
    fn size(&self) -> u64 {
        self.lines.iter().map(|l| l.len() as u64 + 1).sum()
    }
}

/// インメモリバックエンド
#[derive(Default)]
pub struct InMemoryRdsBackend {
    instances: Vec<InstanceDetails>,
    clusters: Vec<ClusterDetails>,
    metrics: Vec<MetricFixture>,
    load_samples: Vec<LoadSampleFixture>,
    logs: Vec<StoredLog>,
    events: Vec<RdsEvent>,
    recommendations: Vec<Recommendation>,
}

impl InMemoryRdsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: Fixtures) -> Self {
        let mut backend = Self {
            instances: fixtures.instances,
            clusters: fixtures.clusters,
            metrics: fixtures.metrics,
            load_samples: fixtures.load_samples,
            events: fixtures.events,
            recommendations: fixtures.recommendations,
            logs: Vec::new(),
        };
        for log in fixtures.log_files {
            backend = backend.with_log_file(
                log.db_instance_identifier,
                log.log_file_name,
                log.last_written,
                log.lines,
            );
        }
        backend
    }

    /// JSON フィクスチャファイルから読み込む
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let fixtures: Fixtures = serde_json::from_str(&content)?;
        info!(
            "Loaded fixtures from {}: {} instances, {} clusters, {} metric series",
            path.display(),
            fixtures.instances.len(),
            fixtures.clusters.len(),
            fixtures.metrics.len()
        );
        Ok(Self::from_fixtures(fixtures))
    }

    pub fn with_instance(mut self, instance: InstanceDetails) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterDetails) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn with_metric(
        mut self,
        resource_id: impl Into<String>,
        metric_name: impl Into<String>,
        unit: Option<&str>,
        points: Vec<DataPoint>,
    ) -> Self {
        self.metrics.push(MetricFixture {
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            unit: unit.map(str::to_string),
            points,
        });
        self
    }

    pub fn with_load_sample(
        mut self,
        resource_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        sample: WaitEventSample,
    ) -> Self {
        self.load_samples.push(LoadSampleFixture {
            resource_id: resource_id.into(),
            timestamp,
            sample,
        });
        self
    }

    pub fn with_log_file<I, S>(
        self,
        db_instance_identifier: impl Into<String>,
        log_file_name: impl Into<String>,
        last_written: DateTime<Utc>,
        lines: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw = lines.into_iter().map(|l| l.into().into_bytes()).collect();
        self.with_raw_log_file(db_instance_identifier, log_file_name, last_written, raw)
    }

    /// バイト列のままログ行を登録する（不正な UTF-8 を含められる）
    pub fn with_raw_log_file(
        mut self,
        db_instance_identifier: impl Into<String>,
        log_file_name: impl Into<String>,
        last_written: DateTime<Utc>,
        lines: Vec<Vec<u8>>,
    ) -> Self {
        self.logs.push(StoredLog {
            db_instance_identifier: db_instance_identifier.into(),
            log_file_name: log_file_name.into(),
            last_written,
            lines,
        });
        self
    }

    pub fn with_event(mut self, event: RdsEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    fn find_instance(&self, id: &str) -> Option<&InstanceDetails> {
        self.instances.iter().find(|i| {
            i.overview.db_instance_identifier == id || i.overview.dbi_resource_id == id
        })
    }

    fn find_cluster(&self, id: &str) -> Option<&ClusterDetails> {
        self.clusters.iter().find(|c| {
            c.overview.db_cluster_identifier == id || c.overview.db_cluster_resource_id == id
        })
    }

    /// 識別子または DbiResourceId を、フィクスチャ上で使われ得る全ての別名に展開する
    fn aliases(&self, id: &str) -> Vec<String> {
        if let Some(instance) = self.find_instance(id) {
            return vec![
                instance.overview.db_instance_identifier.clone(),
                instance.overview.dbi_resource_id.clone(),
            ];
        }
        if let Some(cluster) = self.find_cluster(id) {
            return vec![
                cluster.overview.db_cluster_identifier.clone(),
                cluster.overview.db_cluster_resource_id.clone(),
            ];
        }
        vec![id.to_string()]
    }

    fn is_known_resource(&self, id: &str) -> bool {
        self.find_instance(id).is_some()
            || self.find_cluster(id).is_some()
            || self.metrics.iter().any(|m| m.resource_id == id)
    }

    fn find_log(&self, db_instance_identifier: &str, log_file_name: &str) -> Option<&StoredLog> {
        let aliases = self.aliases(db_instance_identifier);
        self.logs.iter().find(|log| {
            aliases.contains(&log.db_instance_identifier) && log.log_file_name == log_file_name
        })
    }
}

#[async_trait]
impl MetricSampleSource for InMemoryRdsBackend {
    async fn fetch(&self, query: &MetricQuery) -> Result<MetricSeries> {
        if !self.is_known_resource(&query.resource_id) {
            return Err(Error::NotFound(format!("resource '{}'", query.resource_id)));
        }
        let aliases = self.aliases(&query.resource_id);
        let fixture = self
            .metrics
            .iter()
            .find(|m| aliases.contains(&m.resource_id) && m.metric_name == query.metric_name);

        // Unpublished metrics come back as an empty series, as CloudWatch does.
        let (unit, points) = match fixture {
            Some(m) => (
                m.unit.clone(),
                m.points
                    .iter()
                    .filter(|p| query.window.contains_instant(p.timestamp))
                    .copied()
                    .collect(),
            ),
            None => (None, Vec::new()),
        };
        debug!(
            "Serving {} points of {} for {}",
            points.len(),
            query.metric_name,
            query.resource_id
        );
        Ok(MetricSeries::new(
            query.resource_id.clone(),
            query.metric_name.clone(),
            unit,
            query.window,
            points,
        ))
    }

    async fn fetch_load_samples(&self, query: &LoadSampleQuery) -> Result<Vec<WaitEventSample>> {
        if !self.is_known_resource(&query.resource_id) {
            return Err(Error::NotFound(format!("resource '{}'", query.resource_id)));
        }
        let aliases = self.aliases(&query.resource_id);
        Ok(self
            .load_samples
            .iter()
            .filter(|s| aliases.contains(&s.resource_id))
            .filter(|s| query.window.contains_instant(s.timestamp))
            .map(|s| s.sample.clone())
            .collect())
    }
}

#[async_trait]
impl LogReader for InMemoryRdsBackend {
    async fn list_log_files(&self, db_instance_id: &str) -> Result<Vec<LogFileSummary>> {
        if self.find_instance(db_instance_id).is_none() {
            return Err(Error::NotFound(format!("DB instance '{}'", db_instance_id)));
        }
        let aliases = self.aliases(db_instance_id);
        Ok(self
            .logs
            .iter()
            .filter(|log| aliases.contains(&log.db_instance_identifier))
            .map(|log| LogFileSummary {
                log_file_name: log.log_file_name.clone(),
                last_written: log.last_written,
                size: log.size(),
            })
            .collect())
    }

    async fn read_lines(
        &self,
        db_instance_id: &str,
        log_file_name: &str,
        offset: u64,
        max_lines: usize,
    ) -> Result<RawLogPortion> {
        let log = self.find_log(db_instance_id, log_file_name).ok_or_else(|| {
            Error::NotFound(format!("log file '{}' on '{}'", log_file_name, db_instance_id))
        })?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(log.lines.len());
        let end = start.saturating_add(max_lines).min(log.lines.len());
        Ok(RawLogPortion {
            lines: log.lines[start..end].to_vec(),
            additional_data_pending: end < log.lines.len(),
        })
    }
}

#[async_trait]
impl EventSource for InMemoryRdsBackend {
    async fn describe_events(&self, query: &EventQuery) -> Result<Vec<RdsEvent>> {
        let mut events: Vec<RdsEvent> = self
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }
}

#[async_trait]
impl RecommendationSource for InMemoryRdsBackend {
    async fn describe_recommendations(
        &self,
        query: &RecommendationQuery,
    ) -> Result<Vec<Recommendation>> {
        Ok(self
            .recommendations
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InventorySource for InMemoryRdsBackend {
    async fn list_instances(&self) -> Result<Vec<InstanceOverview>> {
        Ok(self.instances.iter().map(|i| i.overview.clone()).collect())
    }

    async fn describe_instance(&self, db_instance_identifier: &str) -> Result<InstanceDetails> {
        self.find_instance(db_instance_identifier)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("DB instance '{}'", db_instance_identifier)))
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterOverview>> {
        Ok(self.clusters.iter().map(|c| c.overview.clone()).collect())
    }

    async fn describe_cluster(&self, db_cluster_identifier: &str) -> Result<ClusterDetails> {
        self.find_cluster(db_cluster_identifier)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("DB cluster '{}'", db_cluster_identifier)))
    }

    async fn list_metrics(
        &self,
        resource_type: ResourceType,
        resource_identifier: &str,
    ) -> Result<Vec<MetricListItem>> {
        let known = match resource_type {
            ResourceType::Instance => self.find_instance(resource_identifier).is_some(),
            ResourceType::Cluster | ResourceType::GlobalCluster => {
                self.find_cluster(resource_identifier).is_some()
            }
        };
        if !known {
            return Err(Error::NotFound(format!(
                "{} '{}'",
                resource_type.uri_segment(),
                resource_identifier
            )));
        }

        let recent_cutoff = Utc::now() - Duration::hours(3);
        let aliases = self.aliases(resource_identifier);
        let mut seen = BTreeSet::new();
        let mut items = Vec::new();
        for metric in self.metrics.iter().filter(|m| aliases.contains(&m.resource_id)) {
            if !seen.insert(metric.metric_name.clone()) {
                continue;
            }
            items.push(MetricListItem {
                metric_name: metric.metric_name.clone(),
                recently_published_data_points: metric
                    .points
                    .iter()
                    .any(|p| p.timestamp >= recent_cutoff),
            });
        }
        Ok(items)
    }
}
