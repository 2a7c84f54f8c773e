//! Metric Summaries
//!
//! メトリクス系列の統計要約（現在値・最小・最大・平均）と代表点の間引き

use super::types::{DataPoint, MetricSeries, ResourceType, TimeWindow};
use serde::{Deserialize, Serialize};

/// インスタンスのデフォルトメトリクス
pub const INSTANCE_METRICS: &[&str] = &[
    "BurstBalance",
    "CPUUtilization",
    "DatabaseConnections",
    "DiskQueueDepth",
    "FreeableMemory",
    "FreeStorageSpace",
    "ReadIOPS",
    "ReadLatency",
    "ReadThroughput",
    "SwapUsage",
    "WriteIOPS",
    "WriteLatency",
    "WriteThroughput",
    "TotalIOPS",
];

/// クラスタのデフォルトメトリクス
pub const CLUSTER_METRICS: &[&str] = &[
    "AuroraVolumeBytesLeftTotal",
    "BackupRetentionPeriodStorageUsed",
    "ServerlessDatabaseCapacity",
    "SnapshotStorageUsed",
    "TotalBackupStorageBilled",
    "VolumeBytesUsed",
    "VolumeReadIOPs",
    "VolumeWriteIOPs",
];

/// グローバルクラスタのデフォルトメトリクス
pub const GLOBAL_CLUSTER_METRICS: &[&str] = &[
    "AuroraGlobalDBReplicationLag",
    "AuroraGlobalDBReplicatedWriteIO",
    "AuroraGlobalDBRPOLag",
    "AuroraGlobalDBProgressLag",
];

pub fn default_metrics(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Instance => INSTANCE_METRICS,
        ResourceType::Cluster => CLUSTER_METRICS,
        ResourceType::GlobalCluster => GLOBAL_CLUSTER_METRICS,
    }
}

/// 1 メトリクスの統計要約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_name: String,
    pub unit: Option<String>,
    pub current_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
    pub data_points_count: usize,
    /// 先頭と末尾を含む代表点
    pub sample_data_points: Vec<DataPoint>,
}

impl MetricSummary {
    /// 系列から要約を作成し、代表点を `max_points` 件以下に間引く
    pub fn from_series(series: &MetricSeries, max_points: usize) -> Self {
        let points = &series.points;
        if points.is_empty() {
            return Self {
                metric_name: series.metric_name.clone(),
                unit: series.unit.clone(),
                current_value: 0.0,
                min_value: 0.0,
                max_value: 0.0,
                avg_value: 0.0,
                data_points_count: 0,
                sample_data_points: Vec::new(),
            };
        }

        let values = points.iter().map(|p| p.value);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.sum::<f64>() / points.len() as f64;
        let current = points.last().map(|p| p.value).unwrap_or_default();

        Self {
            metric_name: series.metric_name.clone(),
            unit: series.unit.clone(),
            current_value: round2(current),
            min_value: round2(min),
            max_value: round2(max),
            avg_value: round2(avg),
            data_points_count: points.len(),
            sample_data_points: downsample(points, max_points)
                .into_iter()
                .map(|p| DataPoint::new(p.timestamp, round2(p.value)))
                .collect(),
        }
    }
}

/// 複数メトリクスの要約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummaryList {
    pub resource_identifier: String,
    pub resource_type: ResourceType,
    pub window: TimeWindow,
    pub metrics: Vec<MetricSummary>,
}

/// 等間隔に間引く。先頭と末尾の点は常に残す
pub fn downsample(points: &[DataPoint], max_points: usize) -> Vec<DataPoint> {
    let max_points = max_points.max(2);
    if points.len() <= max_points {
        return points.to_vec();
    }
    let last = points.len() - 1;
    (0..max_points)
        .map(|i| points[i * last / (max_points - 1)])
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(values: &[f64]) -> MetricSeries {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::new(start, start + Duration::hours(2)).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(start + Duration::minutes(i as i64), *v))
            .collect();
        MetricSeries::new("db-1", "CPUUtilization", Some("Percent".into()), window, points)
    }

    #[test]
    fn test_summary_statistics() {
        let summary = MetricSummary::from_series(&series(&[10.0, 20.004, 30.0, 15.556]), 100);
        assert_eq!(summary.current_value, 15.56);
        assert_eq!(summary.min_value, 10.0);
        assert_eq!(summary.max_value, 30.0);
        assert_eq!(summary.avg_value, 18.89);
        assert_eq!(summary.data_points_count, 4);
        assert_eq!(summary.sample_data_points.len(), 4);
    }

    #[test]
    fn test_empty_series_summary() {
        let summary = MetricSummary::from_series(&series(&[]), 10);
        assert_eq!(summary.data_points_count, 0);
        assert!(summary.sample_data_points.is_empty());
    }

    #[test]
    fn test_downsample_keeps_first_and_last() {
        let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
        let s = series(&values);
        let sampled = downsample(&s.points, 7);
        assert_eq!(sampled.len(), 7);
        assert_eq!(sampled.first().unwrap().value, 0.0);
        assert_eq!(sampled.last().unwrap().value, 99.0);
        assert!(sampled.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_default_catalogues() {
        assert!(default_metrics(ResourceType::Instance).contains(&"CPUUtilization"));
        assert_eq!(default_metrics(ResourceType::GlobalCluster).len(), 4);
    }
}
