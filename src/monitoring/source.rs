//! Metric Sample Source
//!
//! CloudWatch 系と Performance Insights 系のメトリクス取得を一つの
//! トレイトにまとめ、メトリクス名の規約で振り分ける。

use super::types::{Dimension, MetricSeries, ResourceType, TimeWindow, WaitEventSample};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// CloudWatch の統計種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Statistic {
    SampleCount,
    Sum,
    #[default]
    Average,
    Minimum,
    Maximum,
}

/// メトリクス系列の問い合わせ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub metric_name: String,
    pub window: TimeWindow,
    pub period_seconds: u32,
    pub statistic: Statistic,
}

impl MetricQuery {
    pub fn new(
        resource_id: impl Into<String>,
        resource_type: ResourceType,
        metric_name: impl Into<String>,
        window: TimeWindow,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type,
            metric_name: metric_name.into(),
            window,
            period_seconds: 60,
            statistic: Statistic::Average,
        }
    }

    pub fn with_period(mut self, period_seconds: u32) -> Self {
        self.period_seconds = period_seconds;
        self
    }

    pub fn with_statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }

    pub fn source_kind(&self) -> SourceKind {
        SourceKind::for_metric(&self.metric_name)
    }
}

/// ディメンション別負荷サンプルの問い合わせ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSampleQuery {
    pub resource_id: String,
    pub window: TimeWindow,
    pub dimension: Dimension,
    pub period_seconds: u32,
}

/// Capability the core requires from a metric provider.
///
/// Implementations report `Throttled` for rate limits, `NotFound` for
/// unknown resources or metrics and `UpstreamUnavailable` for transient
/// provider failures.
#[async_trait]
pub trait MetricSampleSource: Send + Sync {
    /// 1 メトリクスの時系列を取得
    async fn fetch(&self, query: &MetricQuery) -> Result<MetricSeries>;

    /// ディメンション別の負荷サンプル（db.load）を取得
    async fn fetch_load_samples(&self, query: &LoadSampleQuery) -> Result<Vec<WaitEventSample>>;
}

/// メトリクス提供元の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    CloudWatch,
    PerformanceInsights,
}

impl SourceKind {
    /// `db.` で始まるメトリクスは Performance Insights、それ以外は CloudWatch
    pub fn for_metric(metric_name: &str) -> Self {
        if metric_name.starts_with("db.") {
            SourceKind::PerformanceInsights
        } else {
            SourceKind::CloudWatch
        }
    }
}

/// メトリクス名の規約で 2 つの提供元に振り分けるルーター
#[derive(Clone)]
pub struct MetricSourceRouter {
    cloudwatch: Arc<dyn MetricSampleSource>,
    performance_insights: Arc<dyn MetricSampleSource>,
}

impl MetricSourceRouter {
    pub fn new(
        cloudwatch: Arc<dyn MetricSampleSource>,
        performance_insights: Arc<dyn MetricSampleSource>,
    ) -> Self {
        Self {
            cloudwatch,
            performance_insights,
        }
    }

    fn source_for(&self, kind: SourceKind) -> &Arc<dyn MetricSampleSource> {
        match kind {
            SourceKind::CloudWatch => &self.cloudwatch,
            SourceKind::PerformanceInsights => &self.performance_insights,
        }
    }
}

#[async_trait]
impl MetricSampleSource for MetricSourceRouter {
    async fn fetch(&self, query: &MetricQuery) -> Result<MetricSeries> {
        let kind = query.source_kind();
        debug!(
            "Routing {} for {} to {:?}",
            query.metric_name, query.resource_id, kind
        );
        self.source_for(kind).fetch(query).await
    }

    async fn fetch_load_samples(&self, query: &LoadSampleQuery) -> Result<Vec<WaitEventSample>> {
        self.performance_insights.fetch_load_samples(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::{TimeZone, Utc};

    struct Tagged(&'static str);

    #[async_trait]
    impl MetricSampleSource for Tagged {
        async fn fetch(&self, query: &MetricQuery) -> Result<MetricSeries> {
            Ok(MetricSeries::new(
                query.resource_id.clone(),
                query.metric_name.clone(),
                Some(self.0.to_string()),
                query.window,
                Vec::new(),
            ))
        }

        async fn fetch_load_samples(&self, _query: &LoadSampleQuery) -> Result<Vec<WaitEventSample>> {
            Err(Error::NotFound(self.0.to_string()))
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_source_kind_by_metric_name() {
        assert_eq!(SourceKind::for_metric("db.load.avg"), SourceKind::PerformanceInsights);
        assert_eq!(SourceKind::for_metric("CPUUtilization"), SourceKind::CloudWatch);
    }

    #[test]
    fn test_metric_query_builder_defaults() {
        let query = MetricQuery::new("db-1", ResourceType::Instance, "CPUUtilization", window());
        assert_eq!(query.period_seconds, 60);
        assert_eq!(query.statistic, Statistic::Average);

        let query = query.with_period(300).with_statistic(Statistic::Maximum);
        assert_eq!(query.period_seconds, 300);
        assert_eq!(query.statistic, Statistic::Maximum);
        assert_eq!(query.source_kind(), SourceKind::CloudWatch);

        let json = serde_json::to_value(&query).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert!(!keys.contains(&"dimension"));
    }

    #[tokio::test]
    async fn test_router_dispatches_by_convention() {
        let router = MetricSourceRouter::new(Arc::new(Tagged("cw")), Arc::new(Tagged("pi")));

        let cw = router
            .fetch(&MetricQuery::new("db-1", ResourceType::Instance, "CPUUtilization", window()))
            .await
            .unwrap();
        assert_eq!(cw.unit.as_deref(), Some("cw"));

        let pi = router
            .fetch(&MetricQuery::new("db-1", ResourceType::Instance, "db.load.avg", window()))
            .await
            .unwrap();
        assert_eq!(pi.unit.as_deref(), Some("pi"));

        let samples = router
            .fetch_load_samples(&LoadSampleQuery {
                resource_id: "db-1".into(),
                window: window(),
                dimension: Dimension::WaitEvent,
                period_seconds: 60,
            })
            .await;
        assert!(matches!(samples, Err(Error::NotFound(msg)) if msg == "pi"));
    }
}
