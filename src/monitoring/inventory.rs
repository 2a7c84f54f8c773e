//! Instance and Cluster Inventory
//!
//! DB インスタンス・クラスタのメタデータと利用可能な CloudWatch メトリクス

use super::types::ResourceType;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// インスタンス概要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOverview {
    pub db_instance_identifier: String,
    /// DbiResourceId（Performance Insights の識別子）
    pub dbi_resource_id: String,
    pub db_instance_arn: String,
    pub db_instance_status: String,
    pub db_instance_class: String,
    pub engine: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    pub multi_az: bool,
    #[serde(default)]
    pub db_cluster_identifier: Option<String>,
}

/// インスタンス詳細
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    #[serde(flatten)]
    pub overview: InstanceOverview,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub allocated_storage_gib: Option<u32>,
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub storage_encrypted: Option<bool>,
    #[serde(default)]
    pub iops: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub publicly_accessible: Option<bool>,
    #[serde(default)]
    pub performance_insights_enabled: Option<bool>,
    #[serde(default)]
    pub backup_retention_period: Option<u32>,
    #[serde(default)]
    pub preferred_maintenance_window: Option<String>,
    #[serde(default)]
    pub instance_create_time: Option<DateTime<Utc>>,
}

/// クラスタ概要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOverview {
    pub db_cluster_identifier: String,
    pub db_cluster_resource_id: String,
    pub db_cluster_arn: String,
    pub status: String,
    pub engine: String,
    pub engine_version: String,
    #[serde(default)]
    pub availability_zones: Vec<String>,
    pub multi_az: bool,
}

/// クラスタメンバー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub db_instance_identifier: String,
    pub is_cluster_writer: bool,
}

/// クラスタ詳細
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDetails {
    #[serde(flatten)]
    pub overview: ClusterOverview,
    #[serde(default)]
    pub members: Vec<ClusterMember>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub reader_endpoint: Option<String>,
    #[serde(default)]
    pub storage_encrypted: Option<bool>,
    #[serde(default)]
    pub backup_retention_period: Option<u32>,
    #[serde(default)]
    pub engine_mode: Option<String>,
    #[serde(default)]
    pub deletion_protection: Option<bool>,
    #[serde(default)]
    pub global_cluster_identifier: Option<String>,
    #[serde(default)]
    pub cluster_create_time: Option<DateTime<Utc>>,
}

/// 利用可能なメトリクス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricListItem {
    pub metric_name: String,
    /// 直近 3 時間にデータポイントが発行されたか
    pub recently_published_data_points: bool,
}

/// インベントリ提供元（外部コラボレーター）
///
/// `describe_*` returns `NotFound` for unknown identifiers.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<InstanceOverview>>;

    async fn describe_instance(&self, db_instance_identifier: &str) -> Result<InstanceDetails>;

    async fn list_clusters(&self) -> Result<Vec<ClusterOverview>>;

    async fn describe_cluster(&self, db_cluster_identifier: &str) -> Result<ClusterDetails>;

    async fn list_metrics(
        &self,
        resource_type: ResourceType,
        resource_identifier: &str,
    ) -> Result<Vec<MetricListItem>>;
}
