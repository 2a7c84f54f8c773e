//! Amazon RDS Monitoring
//!
//! RDS のメトリクス、Performance Insights の負荷サンプル、ログ、イベント、
//! 推奨事項を取得・分析し、パフォーマンスレポートを合成する。
//!
//! 外部 API への呼び出しは全てコラボレータートレイト
//! ([`MetricSampleSource`], [`LogReader`], [`EventSource`],
//! [`RecommendationSource`], [`InventorySource`]) 越しに行う。

pub mod classifier;
pub mod events;
pub mod inventory;
pub mod logs;
pub mod memory;
pub mod quality;
pub mod recommendations;
pub mod report;
pub mod retry;
pub mod service;
pub mod source;
pub mod store;
pub mod summary;
pub mod types;

pub use classifier::{Classification, WaitEventClassifier};
pub use events::{EventFilter, EventList, EventQuery, EventSource, EventSourceType, RdsEvent};
pub use inventory::{
    ClusterDetails, ClusterOverview, InstanceDetails, InstanceOverview, InventorySource,
    MetricListItem,
};
pub use logs::{LogCursor, LogFileSummary, LogPage, LogPager, LogReadRequest, LogReader};
pub use memory::{Fixtures, InMemoryRdsBackend};
pub use quality::DataQualityPolicy;
pub use recommendations::{
    Recommendation, RecommendationFilter, RecommendationList, RecommendationSource,
};
pub use report::{Report, ReportRequest, ReportSummary, ReportSynthesizer, Section};
pub use retry::RetryPolicy;
pub use service::{
    Collaborators, CreateReportRequest, PerformanceMetricsRequest, RateLimit,
    RdsMonitoringService, ServiceSettings, SlowQueryAnalysis, SlowQueryRequest,
};
pub use source::{LoadSampleQuery, MetricQuery, MetricSampleSource, SourceKind, Statistic};
pub use store::{ReportStore, RetentionPolicy};
pub use summary::{MetricSummary, MetricSummaryList};
pub use types::{
    DataPoint, Dimension, Finding, LogExcerpt, MetricSeries, ResourceType, TimeWindow,
    WaitEventSample,
};
