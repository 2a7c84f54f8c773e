//! Performance Report Synthesis
//!
//! メトリクス・待機イベント分析・ログ抜粋を 1 つの不変なレポートにまとめる。
//! State machine: `Collecting -> Aggregating -> Persisted`, terminal `Failed`.

use super::classifier::{Classification, WaitEventClassifier, DEFAULT_FINDING_LIMIT};
use super::logs::{LogPager, LogReadRequest, DEFAULT_LOG_LINES};
use super::quality::DataQualityPolicy;
use super::retry::RetryPolicy;
use super::source::{LoadSampleQuery, MetricQuery, MetricSampleSource};
use super::store::ReportStore;
use super::summary::INSTANCE_METRICS;
use super::types::{Dimension, LogExcerpt, MetricSeries, ResourceType, Tags, TimeWindow};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// レポート期間の下限（5 分）
pub fn min_report_window() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// レポート期間の上限（6 日）
pub fn max_report_window() -> chrono::Duration {
    chrono::Duration::days(6)
}

/// サーバーが自動付与するタグ
pub const CREATED_BY_TAG: &str = "created_by";
pub const SERVER_VERSION_TAG: &str = "mcp_server_version";
pub const SERVER_NAME: &str = "rds-monitoring-mcp";

/// 任意セクションの取得結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section<T> {
    Present(T),
    Omitted { reason: String },
}

impl<T> Section<T> {
    pub fn omitted(reason: impl Into<String>) -> Self {
        Section::Omitted {
            reason: reason.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Section::Present(_))
    }

    pub fn as_present(&self) -> Option<&T> {
        match self {
            Section::Present(value) => Some(value),
            Section::Omitted { .. } => None,
        }
    }
}

/// レポート状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SynthesisState {
    Collecting,
    Aggregating,
    Persisted,
    Failed,
}

impl fmt::Display for SynthesisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynthesisState::Collecting => "collecting",
            SynthesisState::Aggregating => "aggregating",
            SynthesisState::Persisted => "persisted",
            SynthesisState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 合成済みのパフォーマンスレポート（作成後は不変）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: String,
    pub resource_id: String,
    pub window: TimeWindow,
    pub created_at: DateTime<Utc>,
    pub metrics: Vec<MetricSeries>,
    pub findings: Section<Classification>,
    pub logs: Section<Vec<LogExcerpt>>,
    pub tags: Tags,
}

impl Report {
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            report_id: self.report_id.clone(),
            resource_id: self.resource_id.clone(),
            window: self.window,
            created_at: self.created_at,
            status: ReportStatus::Succeeded,
        }
    }
}

/// 保存済みレポートの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Succeeded,
}

/// レポート一覧の要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub report_id: String,
    pub resource_id: String,
    pub window: TimeWindow,
    pub created_at: DateTime<Utc>,
    pub status: ReportStatus,
}

/// レポート作成要求
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub resource_id: String,
    pub window: TimeWindow,
    /// 空の場合はインスタンスのデフォルトメトリクス
    pub metric_names: Vec<String>,
    pub dimension: Dimension,
    /// 空の場合は最も新しいログファイル
    pub log_file_names: Vec<String>,
    pub log_pattern: Option<String>,
    pub tags: Tags,
    /// 収集フェーズ全体のタイムアウト（省略時は設定値）
    pub timeout: Option<Duration>,
}

impl ReportRequest {
    pub fn new(resource_id: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            resource_id: resource_id.into(),
            window,
            metric_names: Vec::new(),
            dimension: Dimension::Sql,
            log_file_names: Vec::new(),
            log_pattern: None,
            tags: Tags::new(),
            timeout: None,
        }
    }

    pub fn with_metrics<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metric_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_file_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 合成処理の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisSettings {
    /// 収集フェーズのデフォルトタイムアウト
    pub collect_timeout: Duration,
    /// 任意セクション（負荷サンプル・ログ）ごとのタイムアウト
    pub optional_section_timeout: Duration,
    pub period_seconds: u32,
    pub finding_limit: usize,
    pub log_lines: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            collect_timeout: Duration::from_secs(30),
            optional_section_timeout: Duration::from_secs(10),
            period_seconds: 60,
            finding_limit: DEFAULT_FINDING_LIMIT,
            log_lines: DEFAULT_LOG_LINES,
        }
    }
}

struct Collected {
    metrics: Vec<MetricSeries>,
    findings: Section<Classification>,
    logs: Section<Vec<LogExcerpt>>,
}

/// レポート合成器
pub struct ReportSynthesizer {
    metrics: Arc<dyn MetricSampleSource>,
    logs: LogPager,
    store: Arc<ReportStore>,
    retry: RetryPolicy,
    quality: DataQualityPolicy,
    settings: SynthesisSettings,
}

impl ReportSynthesizer {
    pub fn new(
        metrics: Arc<dyn MetricSampleSource>,
        logs: LogPager,
        store: Arc<ReportStore>,
        retry: RetryPolicy,
        quality: DataQualityPolicy,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            metrics,
            logs,
            store,
            retry,
            quality,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        &self.store
    }

    /// レポートを合成して保存する
    pub async fn synthesize(&self, request: ReportRequest) -> Result<Report> {
        request
            .window
            .ensure_length(min_report_window(), max_report_window())?;

        let deadline = request.timeout.unwrap_or(self.settings.collect_timeout);
        self.transition(&request, SynthesisState::Collecting);
        let collected = match timeout(deadline, self.collect(&request)).await {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => return Err(self.fail(&request, e)),
            Err(_) => {
                let e = Error::Timeout(format!(
                    "report collection for {} exceeded {:?}",
                    request.resource_id, deadline
                ));
                return Err(self.fail(&request, e));
            }
        };

        self.transition(&request, SynthesisState::Aggregating);
        let report = match self.aggregate(&request, collected) {
            Ok(report) => report,
            Err(e) => return Err(self.fail(&request, e)),
        };

        if let Err(e) = self.store.put(report.clone()).await {
            return Err(self.fail(&request, e));
        }
        self.transition(&request, SynthesisState::Persisted);
        info!(
            "Created performance report {} for {} over {}",
            report.report_id, report.resource_id, report.window
        );
        Ok(report)
    }

    fn transition(&self, request: &ReportRequest, state: SynthesisState) {
        debug!("Report for {} {}: {}", request.resource_id, request.window, state);
    }

    fn fail(&self, request: &ReportRequest, e: Error) -> Error {
        error!(
            "Report for {} {}: {} ({})",
            request.resource_id,
            request.window,
            SynthesisState::Failed,
            e
        );
        e
    }

    async fn collect(&self, request: &ReportRequest) -> Result<Collected> {
        let (metrics, findings, logs) = tokio::try_join!(
            self.collect_metrics(request),
            async { Ok::<_, Error>(self.collect_findings(request).await) },
            async { Ok::<_, Error>(self.collect_logs(request).await) },
        )?;
        Ok(Collected {
            metrics,
            findings,
            logs,
        })
    }

    /// 必須セクション。1 つでも失敗すればレポート全体が失敗する
    async fn collect_metrics(&self, request: &ReportRequest) -> Result<Vec<MetricSeries>> {
        let names: Vec<String> = if request.metric_names.is_empty() {
            INSTANCE_METRICS.iter().map(|name| name.to_string()).collect()
        } else {
            request.metric_names.clone()
        };

        let fetches = names.into_iter().map(|name| {
            let query = MetricQuery::new(
                request.resource_id.clone(),
                ResourceType::Instance,
                name,
                request.window,
            )
            .with_period(self.settings.period_seconds);
            async move {
                self.retry
                    .execute(&query.metric_name, || self.metrics.fetch(&query))
                    .await
            }
        });
        try_join_all(fetches).await
    }

    async fn collect_findings(&self, request: &ReportRequest) -> Section<Classification> {
        let query = LoadSampleQuery {
            resource_id: request.resource_id.clone(),
            window: request.window,
            dimension: request.dimension,
            period_seconds: self.settings.period_seconds,
        };
        self.optional_section("findings", async {
            let samples = self
                .retry
                .execute("fetch_load_samples", || self.metrics.fetch_load_samples(&query))
                .await?;
            let classification = WaitEventClassifier::with_limit(self.settings.finding_limit)
                .classify(request.window, request.dimension, &samples);
            self.quality.check(
                "load samples",
                classification.total_samples,
                classification.dropped_samples,
            )?;
            Ok(classification)
        })
        .await
    }

    async fn collect_logs(&self, request: &ReportRequest) -> Section<Vec<LogExcerpt>> {
        self.optional_section("logs", async {
            let file_names = if request.log_file_names.is_empty() {
                let mut files = self.logs.list_log_files(&request.resource_id, usize::MAX).await?;
                files.sort_by(|a, b| b.last_written.cmp(&a.last_written));
                files.into_iter().take(1).map(|f| f.log_file_name).collect()
            } else {
                request.log_file_names.clone()
            };

            let mut excerpts = Vec::with_capacity(file_names.len());
            for file_name in file_names {
                let mut read = LogReadRequest::new(&request.resource_id, file_name)
                    .with_max_lines(self.settings.log_lines);
                read.pattern = request.log_pattern.clone();
                excerpts.push(self.logs.read(&read).await?.excerpt);
            }
            Ok(excerpts)
        })
        .await
    }

    /// 任意セクションはタイムアウト・失敗を `Omitted` に格下げする
    async fn optional_section<T, F>(&self, name: &str, future: F) -> Section<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.settings.optional_section_timeout, future).await {
            Ok(Ok(value)) => Section::Present(value),
            Ok(Err(e)) => {
                warn!("Omitting {} section: {}", name, e);
                Section::omitted(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Omitting {} section: timed out after {:?}",
                    name, self.settings.optional_section_timeout
                );
                Section::omitted(format!(
                    "timed out after {:?}",
                    self.settings.optional_section_timeout
                ))
            }
        }
    }

    fn aggregate(&self, request: &ReportRequest, collected: Collected) -> Result<Report> {
        let queried: Vec<TimeWindow> = collected.metrics.iter().map(|s| s.window).collect();
        if !request.window.is_covered_by(&queried) {
            return Err(Error::DataQualityDegraded(format!(
                "metric series do not cover the report window {}",
                request.window
            )));
        }

        let mut tags = request.tags.clone();
        tags.insert(CREATED_BY_TAG.to_string(), SERVER_NAME.to_string());
        tags.insert(
            SERVER_VERSION_TAG.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        Ok(Report {
            report_id: self.store.allocate_id(),
            resource_id: request.resource_id.clone(),
            window: request.window,
            created_at: Utc::now(),
            metrics: collected.metrics,
            findings: collected.findings,
            logs: collected.logs,
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::logs::{LogFileSummary, LogReader, RawLogPortion};
    use crate::monitoring::types::{DataPoint, WaitEventSample};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap(),
        )
        .unwrap()
    }

    /// Scripted metric source: optionally fails, narrows or stalls.
    #[derive(Default)]
    struct ScriptedMetrics {
        fail_metric: Option<&'static str>,
        narrow_windows: bool,
        load_stall: Option<Duration>,
        metric_stall: Option<Duration>,
        load_calls: AtomicU32,
    }

    #[async_trait]
    impl MetricSampleSource for ScriptedMetrics {
        async fn fetch(&self, query: &MetricQuery) -> Result<MetricSeries> {
            if let Some(stall) = self.metric_stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail_metric == Some(query.metric_name.as_str()) {
                return Err(Error::UpstreamUnavailable("cloudwatch down".into()));
            }
            let window = if self.narrow_windows {
                TimeWindow::new(
                    query.window.start(),
                    query.window.end() - chrono::Duration::minutes(1),
                )?
            } else {
                query.window
            };
            Ok(MetricSeries::new(
                query.resource_id.clone(),
                query.metric_name.clone(),
                Some("Percent".into()),
                window,
                vec![DataPoint::new(window.start(), 1.0)],
            ))
        }

        async fn fetch_load_samples(&self, _query: &LoadSampleQuery) -> Result<Vec<WaitEventSample>> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.load_stall {
                tokio::time::sleep(stall).await;
            }
            Ok(vec![
                WaitEventSample::new("CPU", 5.0).with_sql_id("sql_1"),
                WaitEventSample::new("CPU", 5.0).with_sql_id("sql_2"),
                WaitEventSample::new("IO:DataFileRead", 3.0).with_sql_id("sql_2"),
            ])
        }
    }

    struct BrokenLogs;

    #[async_trait]
    impl LogReader for BrokenLogs {
        async fn list_log_files(&self, _db: &str) -> Result<Vec<LogFileSummary>> {
            Err(Error::UpstreamUnavailable("logs unavailable".into()))
        }

        async fn read_lines(&self, _db: &str, _f: &str, _o: u64, _m: usize) -> Result<RawLogPortion> {
            Err(Error::UpstreamUnavailable("logs unavailable".into()))
        }
    }

    fn synthesizer(metrics: ScriptedMetrics) -> ReportSynthesizer {
        let logs = LogPager::new(
            Arc::new(BrokenLogs),
            RetryPolicy::no_retry(),
            DataQualityPolicy::default(),
        );
        ReportSynthesizer::new(
            Arc::new(metrics),
            logs,
            Arc::new(ReportStore::default()),
            RetryPolicy::no_retry(),
            DataQualityPolicy::default(),
            SynthesisSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_optional_log_failure_is_omitted() {
        let synth = synthesizer(ScriptedMetrics::default());
        let report = synth
            .synthesize(ReportRequest::new("db-1", window()).with_metrics(["CPUUtilization"]))
            .await
            .unwrap();

        assert!(matches!(report.logs, Section::Omitted { .. }));
        let findings = report.findings.as_present().unwrap();
        assert_eq!(findings.findings[0].subject, "sql_2");
        assert_eq!(findings.findings[0].score, 8.0);
        assert_eq!(report.tags.get(CREATED_BY_TAG).map(String::as_str), Some(SERVER_NAME));
        assert_eq!(synth.store().get(&report.report_id).await.unwrap(), report);
    }

    #[tokio::test]
    async fn test_mandatory_metric_failure_persists_nothing() {
        let synth = synthesizer(ScriptedMetrics {
            fail_metric: Some("ReadIOPS"),
            ..Default::default()
        });
        let result = synth
            .synthesize(
                ReportRequest::new("db-1", window()).with_metrics(["CPUUtilization", "ReadIOPS"]),
            )
            .await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable(_))));
        assert!(synth.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_uncovered_window_is_rejected() {
        let synth = synthesizer(ScriptedMetrics {
            narrow_windows: true,
            ..Default::default()
        });
        let result = synth.synthesize(ReportRequest::new("db-1", window())).await;
        assert!(matches!(result, Err(Error::DataQualityDegraded(_))));
        assert!(synth.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_window_length_validated_before_io() {
        let synth = synthesizer(ScriptedMetrics::default());
        let start = window().start();
        let short = TimeWindow::new(start, start + chrono::Duration::minutes(1)).unwrap();
        let result = synth.synthesize(ReportRequest::new("db-1", short)).await;
        assert!(matches!(result, Err(Error::InvalidWindow(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_optional_section_is_omitted() {
        let synth = synthesizer(ScriptedMetrics {
            load_stall: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let report = synth
            .synthesize(ReportRequest::new("db-1", window()).with_metrics(["CPUUtilization"]))
            .await
            .unwrap();
        assert!(matches!(report.findings, Section::Omitted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_timeout_fails_without_persisting() {
        let synth = synthesizer(ScriptedMetrics {
            metric_stall: Some(Duration::from_secs(120)),
            ..Default::default()
        });
        let result = synth
            .synthesize(
                ReportRequest::new("db-1", window())
                    .with_metrics(["CPUUtilization"])
                    .with_timeout(Duration::from_secs(5)),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(synth.store().is_empty().await);
    }
}
