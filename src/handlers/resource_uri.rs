//! aws-rds:// Resource URIs
//!
//! リソース URI の解析と生成、テンプレート一覧

use crate::mcp::{McpError, Resource, ResourceTemplate};
use crate::monitoring::ResourceType;
use std::fmt;

pub const URI_SCHEME: &str = "aws-rds://";

/// 解析済みのリソース URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Clusters,
    Cluster(String),
    Instances,
    Instance(String),
    InstanceLogs(String),
    PerformanceReports(String),
    PerformanceReport { resource_id: String, report_id: String },
    CloudWatchMetrics {
        resource_type: ResourceType,
        resource_id: String,
    },
    MetricsGuide,
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self, McpError> {
        let not_found = || McpError::ResourceNotFound(uri.to_string());
        let path = uri.strip_prefix(URI_SCHEME).ok_or_else(not_found)?;
        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(not_found());
        }

        let parsed = match segments.as_slice() {
            ["metrics-guide"] => ResourceUri::MetricsGuide,
            ["db-cluster"] => ResourceUri::Clusters,
            ["db-instance"] => ResourceUri::Instances,
            ["db-cluster", id] => ResourceUri::Cluster(id.to_string()),
            ["db-instance", id] => ResourceUri::Instance(id.to_string()),
            ["db-instance", id, "log"] => ResourceUri::InstanceLogs(id.to_string()),
            ["db-instance", id, "performance_report"] => {
                ResourceUri::PerformanceReports(id.to_string())
            }
            ["db-instance", id, "performance_report", report_id] => {
                ResourceUri::PerformanceReport {
                    resource_id: id.to_string(),
                    report_id: report_id.to_string(),
                }
            }
            [segment, id, "cloudwatch_metrics"] => ResourceUri::CloudWatchMetrics {
                resource_type: ResourceType::from_uri_segment(segment).ok_or_else(not_found)?,
                resource_id: id.to_string(),
            },
            _ => return Err(not_found()),
        };
        Ok(parsed)
    }

    /// JSON 以外（Markdown）を返すリソースか
    pub fn mime_type(&self) -> &'static str {
        match self {
            ResourceUri::MetricsGuide => "text/markdown",
            _ => "application/json",
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URI_SCHEME)?;
        match self {
            ResourceUri::Clusters => write!(f, "db-cluster"),
            ResourceUri::Cluster(id) => write!(f, "db-cluster/{}", id),
            ResourceUri::Instances => write!(f, "db-instance"),
            ResourceUri::Instance(id) => write!(f, "db-instance/{}", id),
            ResourceUri::InstanceLogs(id) => write!(f, "db-instance/{}/log", id),
            ResourceUri::PerformanceReports(id) => {
                write!(f, "db-instance/{}/performance_report", id)
            }
            ResourceUri::PerformanceReport {
                resource_id,
                report_id,
            } => write!(
                f,
                "db-instance/{}/performance_report/{}",
                resource_id, report_id
            ),
            ResourceUri::CloudWatchMetrics {
                resource_type,
                resource_id,
            } => write!(
                f,
                "{}/{}/cloudwatch_metrics",
                resource_type.uri_segment(),
                resource_id
            ),
            ResourceUri::MetricsGuide => write!(f, "metrics-guide"),
        }
    }
}

fn resource(uri: ResourceUri, name: &str, description: &str) -> Resource {
    Resource {
        mime_type: Some(uri.mime_type().to_string()),
        uri: uri.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
    }
}

fn template(uri_template: &str, name: &str, description: &str) -> ResourceTemplate {
    ResourceTemplate {
        uri_template: format!("{}{}", URI_SCHEME, uri_template),
        name: name.to_string(),
        description: Some(description.to_string()),
        mime_type: Some("application/json".to_string()),
    }
}

/// 固定 URI のリソース
pub fn static_resources() -> Vec<Resource> {
    vec![
        resource(
            ResourceUri::Clusters,
            "ListDBClusters",
            "All Amazon RDS DB clusters in the region",
        ),
        resource(
            ResourceUri::Instances,
            "ListDBInstances",
            "All Amazon RDS DB instances in the region",
        ),
        resource(
            ResourceUri::MetricsGuide,
            "RDSMetricGuide",
            "Guide to RDS CloudWatch metrics, Performance Insights dimensions and logs",
        ),
    ]
}

/// パラメータ付きリソースのテンプレート
pub fn resource_templates() -> Vec<ResourceTemplate> {
    vec![
        template(
            "db-cluster/{cluster_id}",
            "DescribeDBCluster",
            "Detailed configuration of one DB cluster",
        ),
        template(
            "db-instance/{instance_id}",
            "DescribeDBInstance",
            "Detailed configuration of one DB instance",
        ),
        template(
            "db-instance/{instance_id}/log",
            "ListDBLogFiles",
            "Non-empty log files of a DB instance",
        ),
        template(
            "db-instance/{dbi_resource_identifier}/performance_report",
            "ListPerformanceReports",
            "Performance reports created for a DB instance",
        ),
        template(
            "db-instance/{dbi_resource_identifier}/performance_report/{report_id}",
            "ReadPerformanceReport",
            "Content of one performance report",
        ),
        template(
            "{resource_type}/{resource_identifier}/cloudwatch_metrics",
            "ListCloudWatchMetrics",
            "CloudWatch metrics available for a DB instance or cluster",
        ),
    ]
}
