//! RDS Monitoring Service
//!
//! 全ての監視オペレーションの窓口。コラボレーター、再試行ポリシー、
//! レポートストア、合成器、読み取り専用モードとレート制限を束ねる。

use super::classifier::{Classification, WaitEventClassifier, DEFAULT_FINDING_LIMIT, MAX_FINDING_LIMIT};
use super::events::{EventFilter, EventList, EventSource};
use super::inventory::{
    ClusterDetails, ClusterOverview, InstanceDetails, InstanceOverview, InventorySource,
    MetricListItem,
};
use super::logs::{LogFileSummary, LogPage, LogPager, LogReadRequest, LogReader};
use super::memory::InMemoryRdsBackend;
use super::quality::DataQualityPolicy;
use super::recommendations::{RecommendationFilter, RecommendationList, RecommendationSource};
use super::report::{
    max_report_window, min_report_window, Report, ReportRequest, ReportSummary, ReportSynthesizer,
    SynthesisSettings,
};
use super::retry::RetryPolicy;
use super::source::{
    LoadSampleQuery, MetricQuery, MetricSampleSource, MetricSourceRouter, Statistic,
};
use super::store::{ReportStore, RetentionPolicy};
use super::summary::{default_metrics, MetricSummary, MetricSummaryList};
use super::types::{resolve_window, Dimension, ResourceType, Tags, TimeWindow};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::try_join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// メトリクスガイド（バイナリに同梱）
pub const METRICS_GUIDE: &str = include_str!("metrics_guide.md");

/// Performance Insights で許可される集計間隔
pub const ALLOWED_PI_PERIODS: [u32; 5] = [1, 60, 300, 3600, 86400];

/// 外部コラボレーター一式
#[derive(Clone)]
pub struct Collaborators {
    pub cloudwatch: Arc<dyn MetricSampleSource>,
    pub performance_insights: Arc<dyn MetricSampleSource>,
    pub logs: Arc<dyn LogReader>,
    pub events: Arc<dyn EventSource>,
    pub recommendations: Arc<dyn RecommendationSource>,
    pub inventory: Arc<dyn InventorySource>,
}

impl Collaborators {
    /// 全ての役割を 1 つのインメモリバックエンドで賄う
    pub fn in_memory(backend: Arc<InMemoryRdsBackend>) -> Self {
        Self {
            cloudwatch: backend.clone(),
            performance_insights: backend.clone(),
            logs: backend.clone(),
            events: backend.clone(),
            recommendations: backend.clone(),
            inventory: backend,
        }
    }
}

/// レート制限の設定（`calls` 回 / `period`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub calls: u32,
    pub period: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            calls: 3,
            period: Duration::from_secs(50),
        }
    }
}

/// サービス設定
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub max_items: usize,
    pub readonly: bool,
    pub retry: RetryPolicy,
    pub quality: DataQualityPolicy,
    pub retention: RetentionPolicy,
    pub synthesis: SynthesisSettings,
    pub report_rate_limit: RateLimit,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_items: 100,
            readonly: true,
            retry: RetryPolicy::default(),
            quality: DataQualityPolicy::default(),
            retention: RetentionPolicy::default(),
            synthesis: SynthesisSettings::default(),
            report_rate_limit: RateLimit::default(),
        }
    }
}

/// `DescribeRDSPerformanceMetrics` の引数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetricsRequest {
    pub resource_identifier: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub metric_names: Option<Vec<String>>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub period: Option<u32>,
    #[serde(default)]
    pub stat: Option<Statistic>,
}

/// `FindSlowQueriesAndWaitEvents` の引数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryRequest {
    pub dbi_resource_identifier: String,
    #[serde(default = "default_dimension")]
    pub dimension: Dimension,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default = "default_pi_period")]
    pub period_in_seconds: u32,
    #[serde(default = "default_finding_limit")]
    pub limit: usize,
}

fn default_dimension() -> Dimension {
    Dimension::WaitEvent
}

fn default_pi_period() -> u32 {
    300
}

fn default_finding_limit() -> usize {
    DEFAULT_FINDING_LIMIT
}

/// 待機イベント / SQL 分析結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryAnalysis {
    pub resource_identifier: String,
    pub period_seconds: u32,
    #[serde(flatten)]
    pub classification: Classification,
}

/// `CreatePerformanceReport` の引数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateReportRequest {
    pub dbi_resource_identifier: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub metric_names: Option<Vec<String>>,
    #[serde(default)]
    pub log_file_names: Option<Vec<String>>,
    #[serde(default)]
    pub log_pattern: Option<String>,
    /// `[{"team": "db"}, {"ticket": "OPS-1"}]` 形式のタグ
    #[serde(default)]
    pub tags: Option<Vec<BTreeMap<String, String>>>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// RDS 監視サービス
pub struct RdsMonitoringService {
    metrics: Arc<dyn MetricSampleSource>,
    logs: LogPager,
    events: Arc<dyn EventSource>,
    recommendations: Arc<dyn RecommendationSource>,
    inventory: Arc<dyn InventorySource>,
    store: Arc<ReportStore>,
    synthesizer: ReportSynthesizer,
    report_limiter: DefaultDirectRateLimiter,
    settings: ServiceSettings,
}

impl RdsMonitoringService {
    pub fn new(collaborators: Collaborators, settings: ServiceSettings) -> Result<Self> {
        let metrics: Arc<dyn MetricSampleSource> = Arc::new(MetricSourceRouter::new(
            collaborators.cloudwatch,
            collaborators.performance_insights,
        ));
        let logs = LogPager::new(collaborators.logs, settings.retry, settings.quality);
        let store = Arc::new(ReportStore::new(settings.retention));
        let synthesizer = ReportSynthesizer::new(
            metrics.clone(),
            logs.clone(),
            store.clone(),
            settings.retry,
            settings.quality,
            settings.synthesis,
        );

        Ok(Self {
            metrics,
            logs,
            events: collaborators.events,
            recommendations: collaborators.recommendations,
            inventory: collaborators.inventory,
            store,
            synthesizer,
            report_limiter: rate_limiter(settings.report_rate_limit)?,
            settings,
        })
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn is_readonly(&self) -> bool {
        self.settings.readonly
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        &self.store
    }

    /// RDS イベントの取得
    pub async fn describe_events(&self, filter: EventFilter) -> Result<EventList> {
        let query = filter.resolve(Utc::now())?;
        let mut events = self
            .settings
            .retry
            .execute("describe_events", || self.events.describe_events(&query))
            .await?;
        events.truncate(self.settings.max_items);
        info!(
            "Found {} events for {} {}",
            events.len(),
            query.source_identifier,
            query.window
        );
        Ok(EventList {
            source_identifier: query.source_identifier,
            source_type: query.source_type,
            count: events.len(),
            events,
        })
    }

    /// パフォーマンスメトリクスの要約
    pub async fn describe_performance_metrics(
        &self,
        request: PerformanceMetricsRequest,
    ) -> Result<MetricSummaryList> {
        let window = resolve_window(
            request.start_date.as_deref(),
            request.end_date.as_deref(),
            Utc::now(),
            ChronoDuration::hours(1),
        )?;
        let period = request.period.unwrap_or(60);
        if period == 0 {
            return Err(Error::InvalidParams("period must be positive".into()));
        }
        let names: Vec<String> = match request.metric_names {
            Some(names) if !names.is_empty() => names,
            _ => default_metrics(request.resource_type)
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };

        let fetches = names.into_iter().map(|name| {
            let query = MetricQuery::new(
                request.resource_identifier.clone(),
                request.resource_type,
                name,
                window,
            )
            .with_period(period)
            .with_statistic(request.stat.unwrap_or_default());
            async move {
                self.settings
                    .retry
                    .execute(&query.metric_name, || self.metrics.fetch(&query))
                    .await
            }
        });
        let series = try_join_all(fetches).await?;

        Ok(MetricSummaryList {
            resource_identifier: request.resource_identifier,
            resource_type: request.resource_type,
            window,
            metrics: series
                .iter()
                .map(|s| MetricSummary::from_series(s, self.settings.max_items))
                .collect(),
        })
    }

    /// RDS 推奨事項の取得
    pub async fn describe_recommendations(
        &self,
        filter: RecommendationFilter,
    ) -> Result<RecommendationList> {
        let query = filter.resolve()?;
        let mut recommendations = self
            .settings
            .retry
            .execute("describe_recommendations", || {
                self.recommendations.describe_recommendations(&query)
            })
            .await?;
        recommendations.truncate(self.settings.max_items);
        Ok(RecommendationList {
            count: recommendations.len(),
            recommendations,
        })
    }

    /// 待機イベント / SQL の負荷ランキング
    pub async fn find_slow_queries_and_wait_events(
        &self,
        request: SlowQueryRequest,
    ) -> Result<SlowQueryAnalysis> {
        if !(1..=MAX_FINDING_LIMIT).contains(&request.limit) {
            return Err(Error::InvalidParams(format!(
                "limit must be between 1 and {}",
                MAX_FINDING_LIMIT
            )));
        }
        if !ALLOWED_PI_PERIODS.contains(&request.period_in_seconds) {
            return Err(Error::InvalidParams(format!(
                "period_in_seconds must be one of {:?}",
                ALLOWED_PI_PERIODS
            )));
        }
        let window = resolve_window(
            request.start_time.as_deref(),
            request.end_time.as_deref(),
            Utc::now(),
            ChronoDuration::hours(1),
        )?;

        let query = LoadSampleQuery {
            resource_id: request.dbi_resource_identifier.clone(),
            window,
            dimension: request.dimension,
            period_seconds: request.period_in_seconds,
        };
        let samples = self
            .settings
            .retry
            .execute("fetch_load_samples", || self.metrics.fetch_load_samples(&query))
            .await?;

        let classification = WaitEventClassifier::with_limit(request.limit).classify(
            window,
            request.dimension,
            &samples,
        );
        self.settings.quality.check(
            "load samples",
            classification.total_samples,
            classification.dropped_samples,
        )?;
        info!(
            "Ranked {} {} subjects for {} over {}",
            classification.findings.len(),
            request.dimension,
            request.dbi_resource_identifier,
            window
        );

        Ok(SlowQueryAnalysis {
            resource_identifier: request.dbi_resource_identifier,
            period_seconds: request.period_in_seconds,
            classification,
        })
    }

    /// ログファイルの読み取り
    pub async fn read_db_log_files(&self, request: LogReadRequest) -> Result<LogPage> {
        self.logs.read(&request).await
    }

    /// パフォーマンスレポートの作成
    pub async fn create_performance_report(&self, request: CreateReportRequest) -> Result<Report> {
        if self.settings.readonly {
            warn!("Refusing CreatePerformanceReport in readonly mode");
            return Err(Error::ReadOnly(
                "the server is running in readonly mode; restart with --no-readonly to create reports"
                    .into(),
            ));
        }

        let window = report_window(&request, Utc::now())?;
        window.ensure_length(min_report_window(), max_report_window())?;

        if self.report_limiter.check().is_err() {
            warn!("CreatePerformanceReport rate limit exceeded");
            return Err(Error::RateLimited(format!(
                "at most {} reports may be created every {:?}",
                self.settings.report_rate_limit.calls, self.settings.report_rate_limit.period
            )));
        }

        let mut tags = Tags::new();
        for tag in request.tags.iter().flatten() {
            tags.extend(tag.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut report_request = ReportRequest::new(&request.dbi_resource_identifier, window);
        report_request.metric_names = request.metric_names.unwrap_or_default();
        report_request.log_file_names = request.log_file_names.unwrap_or_default();
        report_request.log_pattern = request.log_pattern;
        report_request.tags = tags;
        report_request.timeout = request.timeout_seconds.map(Duration::from_secs);

        self.synthesizer.synthesize(report_request).await
    }

    pub async fn list_instances(&self) -> Result<Vec<InstanceOverview>> {
        let mut instances = self
            .settings
            .retry
            .execute("list_instances", || self.inventory.list_instances())
            .await?;
        instances.truncate(self.settings.max_items);
        Ok(instances)
    }

    pub async fn describe_instance(&self, db_instance_identifier: &str) -> Result<InstanceDetails> {
        self.settings
            .retry
            .execute("describe_instance", || {
                self.inventory.describe_instance(db_instance_identifier)
            })
            .await
    }

    pub async fn list_clusters(&self) -> Result<Vec<ClusterOverview>> {
        let mut clusters = self
            .settings
            .retry
            .execute("list_clusters", || self.inventory.list_clusters())
            .await?;
        clusters.truncate(self.settings.max_items);
        Ok(clusters)
    }

    pub async fn describe_cluster(&self, db_cluster_identifier: &str) -> Result<ClusterDetails> {
        self.settings
            .retry
            .execute("describe_cluster", || {
                self.inventory.describe_cluster(db_cluster_identifier)
            })
            .await
    }

    pub async fn list_log_files(&self, db_instance_identifier: &str) -> Result<Vec<LogFileSummary>> {
        self.logs
            .list_log_files(db_instance_identifier, self.settings.max_items)
            .await
    }

    pub async fn list_cloudwatch_metrics(
        &self,
        resource_type: ResourceType,
        resource_identifier: &str,
    ) -> Result<Vec<MetricListItem>> {
        let mut metrics = self
            .settings
            .retry
            .execute("list_metrics", || {
                self.inventory.list_metrics(resource_type, resource_identifier)
            })
            .await?;
        metrics.truncate(self.settings.max_items);
        Ok(metrics)
    }

    pub async fn list_performance_reports(&self, dbi_resource_identifier: &str) -> Vec<ReportSummary> {
        self.store
            .list(Some(dbi_resource_identifier), self.settings.max_items)
            .await
    }

    /// レポートを取得（別リソースのレポート ID は NotFound）
    pub async fn read_performance_report(
        &self,
        dbi_resource_identifier: &str,
        report_id: &str,
    ) -> Result<Report> {
        let report = self.store.get(report_id).await?;
        if report.resource_id != dbi_resource_identifier {
            return Err(Error::NotFound(format!(
                "performance report '{}' for '{}'",
                report_id, dbi_resource_identifier
            )));
        }
        Ok(report)
    }

    pub fn metrics_guide(&self) -> &'static str {
        METRICS_GUIDE
    }
}

/// 開始・終了が共に省略された場合は「5 日前から 2 日前」
fn report_window(request: &CreateReportRequest, now: DateTime<Utc>) -> Result<TimeWindow> {
    match (&request.start_time, &request.end_time) {
        (None, None) => TimeWindow::new(now - ChronoDuration::days(5), now - ChronoDuration::days(2)),
        (start, end) => resolve_window(
            start.as_deref(),
            end.as_deref(),
            now,
            ChronoDuration::days(3),
        ),
    }
}

fn rate_limiter(limit: RateLimit) -> Result<DefaultDirectRateLimiter> {
    let burst = NonZeroU32::new(limit.calls)
        .ok_or_else(|| Error::Config("report rate limit calls must be at least 1".into()))?;
    let replenish = limit.period / limit.calls;
    let quota = Quota::with_period(replenish)
        .ok_or_else(|| Error::Config("report rate limit period must be positive".into()))?
        .allow_burst(burst);
    Ok(RateLimiter::direct(quota))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::DataPoint;
    use chrono::TimeZone;

    fn backend() -> Arc<InMemoryRdsBackend> {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        Arc::new(InMemoryRdsBackend::new().with_metric(
            "db-1",
            "CPUUtilization",
            Some("Percent"),
            (0..10)
                .map(|i| DataPoint::new(start + ChronoDuration::minutes(i), i as f64))
                .collect(),
        ))
    }

    fn service(settings: ServiceSettings) -> RdsMonitoringService {
        RdsMonitoringService::new(Collaborators::in_memory(backend()), settings).unwrap()
    }

    #[tokio::test]
    async fn test_readonly_refuses_report_creation() {
        let svc = service(ServiceSettings::default());
        let result = svc
            .create_performance_report(CreateReportRequest {
                dbi_resource_identifier: "db-1".into(),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(Error::ReadOnly(_))));
        assert!(svc.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_limit_rejected_before_io() {
        let svc = service(ServiceSettings::default());
        let result = svc
            .find_slow_queries_and_wait_events(SlowQueryRequest {
                dbi_resource_identifier: "db-unknown".into(),
                dimension: Dimension::Sql,
                start_time: None,
                end_time: None,
                period_in_seconds: 60,
                limit: 51,
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidParams(_))));
    }

    #[tokio::test]
    async fn test_performance_metrics_downsampled() {
        let svc = service(ServiceSettings {
            max_items: 4,
            ..Default::default()
        });
        let summary = svc
            .describe_performance_metrics(PerformanceMetricsRequest {
                resource_identifier: "db-1".into(),
                resource_type: ResourceType::Instance,
                metric_names: Some(vec!["CPUUtilization".into()]),
                start_date: Some("2025-06-01T00:00:00Z".into()),
                end_date: Some("2025-06-01T01:00:00Z".into()),
                period: Some(60),
                stat: None,
            })
            .await
            .unwrap();

        let cpu = &summary.metrics[0];
        assert_eq!(cpu.data_points_count, 10);
        assert_eq!(cpu.sample_data_points.len(), 4);
        assert_eq!(cpu.max_value, 9.0);
    }

    #[test]
    fn test_zero_rate_limit_is_config_error() {
        let result = rate_limiter(RateLimit {
            calls: 0,
            period: Duration::from_secs(50),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
