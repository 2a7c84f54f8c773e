//! Amazon RDS Monitoring Handler
//!
//! MCP のツール呼び出しとリソース読み取りを [`RdsMonitoringService`] の
//! オペレーションへ対応付ける。

use super::resource_uri::{resource_templates, static_resources, ResourceUri};
use crate::error::{Error, Result};
use crate::mcp::{
    InitializeParams, McpError, McpHandler, Resource, ResourceReadParams, ResourceTemplate, Tool,
    ToolCallParams, PROTOCOL_VERSION,
};
use crate::monitoring::events::EventSourceType;
use crate::monitoring::report::SERVER_NAME;
use crate::monitoring::{
    CreateReportRequest, EventFilter, LogReadRequest, PerformanceMetricsRequest,
    RdsMonitoringService, RecommendationFilter, ResourceType, SlowQueryRequest,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CREATE_REPORT_TOOL: &str = "CreatePerformanceReport";

/// リソース読み取り結果
enum ResourceBody {
    Json(Value),
    Text(&'static str),
}

impl ResourceBody {
    fn into_text(self) -> Result<String> {
        match self {
            ResourceBody::Json(value) => Ok(serde_json::to_string_pretty(&value)?),
            ResourceBody::Text(text) => Ok(text.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct InstanceArgs {
    db_instance_identifier: String,
}

#[derive(Deserialize)]
struct ClusterArgs {
    db_cluster_identifier: String,
}

#[derive(Deserialize)]
struct ReportListArgs {
    dbi_resource_identifier: String,
}

#[derive(Deserialize)]
struct ReportArgs {
    dbi_resource_identifier: String,
    report_id: String,
}

#[derive(Deserialize)]
struct MetricListArgs {
    /// `db-instance` または `db-cluster`
    resource_type: String,
    resource_identifier: String,
}

/// RDS 監視 MCP ハンドラー
pub struct RdsMonitoringHandler {
    service: Arc<RdsMonitoringService>,
    register_resources_as_tools: bool,
}

impl RdsMonitoringHandler {
    pub fn new(service: Arc<RdsMonitoringService>) -> Self {
        Self {
            service,
            register_resources_as_tools: false,
        }
    }

    /// リソースをツールとしても公開する（リソース非対応クライアント向け）
    pub fn with_resources_as_tools(mut self, enabled: bool) -> Self {
        self.register_resources_as_tools = enabled;
        self
    }

    pub fn service(&self) -> &Arc<RdsMonitoringService> {
        &self.service
    }

    async fn run_tool(&self, name: &str, args: Value) -> Option<Result<String>> {
        let outcome = match name {
            "DescribeRDSEvents" => self.describe_events(args).await,
            "DescribeRDSPerformanceMetrics" => self.describe_performance_metrics(args).await,
            "DescribeRDSRecommendations" => self.describe_recommendations(args).await,
            "FindSlowQueriesAndWaitEvents" => self.find_slow_queries(args).await,
            "ReadDBLogFiles" => self.read_log_files(args).await,
            CREATE_REPORT_TOOL => self.create_report(args).await,
            _ if self.register_resources_as_tools => {
                let uri = resource_tool_uri(name, args)?;
                match uri {
                    Ok(uri) => self.read_uri(&uri).await.and_then(ResourceBody::into_text),
                    Err(e) => Err(e),
                }
            }
            _ => return None,
        };
        Some(outcome)
    }

    async fn describe_events(&self, args: Value) -> Result<String> {
        let filter: EventFilter = decode_args(args)?;
        to_text(&self.service.describe_events(filter).await?)
    }

    async fn describe_performance_metrics(&self, args: Value) -> Result<String> {
        let request: PerformanceMetricsRequest = decode_args(args)?;
        to_text(&self.service.describe_performance_metrics(request).await?)
    }

    async fn describe_recommendations(&self, args: Value) -> Result<String> {
        let filter: RecommendationFilter = decode_args(args)?;
        to_text(&self.service.describe_recommendations(filter).await?)
    }

    async fn find_slow_queries(&self, args: Value) -> Result<String> {
        let request: SlowQueryRequest = decode_args(args)?;
        to_text(&self.service.find_slow_queries_and_wait_events(request).await?)
    }

    async fn read_log_files(&self, args: Value) -> Result<String> {
        let request: LogReadRequest = decode_args(args)?;
        to_text(&self.service.read_db_log_files(request).await?)
    }

    async fn create_report(&self, args: Value) -> Result<String> {
        let request: CreateReportRequest = decode_args(args)?;
        let report = self.service.create_performance_report(request).await?;
        let uri = ResourceUri::PerformanceReport {
            resource_id: report.resource_id.clone(),
            report_id: report.report_id.clone(),
        };
        info!("Created {} at {}", report.report_id, uri);
        to_text(&json!({
            "report_id": report.report_id,
            "resource_uri": uri.to_string(),
            "window": report.window,
            "created_at": report.created_at,
            "findings_included": report.findings.is_present(),
            "logs_included": report.logs.is_present(),
        }))
    }

    async fn read_uri(&self, uri: &ResourceUri) -> Result<ResourceBody> {
        let here = uri.to_string();
        let body = match uri {
            ResourceUri::Instances => {
                let instances = self.service.list_instances().await?;
                let items = instances
                    .iter()
                    .map(|i| {
                        with_uri(i, ResourceUri::Instance(i.db_instance_identifier.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                json!({ "instances": items, "count": items.len(), "resource_uri": here })
            }
            ResourceUri::Instance(id) => with_uri(
                &self.service.describe_instance(id).await?,
                uri.clone(),
            )?,
            ResourceUri::Clusters => {
                let clusters = self.service.list_clusters().await?;
                let items = clusters
                    .iter()
                    .map(|c| with_uri(c, ResourceUri::Cluster(c.db_cluster_identifier.clone())))
                    .collect::<Result<Vec<_>>>()?;
                json!({ "clusters": items, "count": items.len(), "resource_uri": here })
            }
            ResourceUri::Cluster(id) => with_uri(
                &self.service.describe_cluster(id).await?,
                uri.clone(),
            )?,
            ResourceUri::InstanceLogs(id) => {
                let files = self.service.list_log_files(id).await?;
                json!({ "log_files": files, "count": files.len(), "resource_uri": here })
            }
            ResourceUri::PerformanceReports(id) => {
                let reports = self.service.list_performance_reports(id).await;
                let items = reports
                    .iter()
                    .map(|r| {
                        with_uri(
                            r,
                            ResourceUri::PerformanceReport {
                                resource_id: r.resource_id.clone(),
                                report_id: r.report_id.clone(),
                            },
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                json!({ "reports": items, "count": items.len(), "resource_uri": here })
            }
            ResourceUri::PerformanceReport {
                resource_id,
                report_id,
            } => serde_json::to_value(
                self.service
                    .read_performance_report(resource_id, report_id)
                    .await?,
            )?,
            ResourceUri::CloudWatchMetrics {
                resource_type,
                resource_id,
            } => {
                let metrics = self
                    .service
                    .list_cloudwatch_metrics(*resource_type, resource_id)
                    .await?;
                json!({ "metrics": metrics, "count": metrics.len(), "resource_uri": here })
            }
            ResourceUri::MetricsGuide => return Ok(ResourceBody::Text(self.service.metrics_guide())),
        };
        Ok(ResourceBody::Json(body))
    }

    fn core_tools(&self) -> Vec<Tool> {
        let mut tools = vec![
            Tool {
                name: "DescribeRDSEvents".to_string(),
                description: "Retrieve events for an RDS resource such as maintenance, failover, backup and configuration changes. Defaults to the last hour.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "source_identifier": {
                            "type": "string",
                            "description": "Identifier of the event source, e.g. a DB instance identifier"
                        },
                        "source_type": {
                            "type": "string",
                            "enum": EventSourceType::ALL,
                            "description": "Type of the event source"
                        },
                        "event_categories": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Only return events in these categories"
                        },
                        "duration": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 20160,
                            "description": "Number of minutes to look back. Cannot be combined with start_time/end_time"
                        },
                        "start_time": { "type": "string", "description": "ISO 8601 start time" },
                        "end_time": { "type": "string", "description": "ISO 8601 end time" }
                    },
                    "required": ["source_identifier", "source_type"]
                }),
            },
            Tool {
                name: "DescribeRDSPerformanceMetrics".to_string(),
                description: "Summarize CloudWatch and Performance Insights metrics (current, min, max, average and sample points) for a DB instance, cluster or global cluster.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "resource_identifier": {
                            "type": "string",
                            "description": "DB instance or cluster identifier"
                        },
                        "resource_type": {
                            "type": "string",
                            "enum": ["INSTANCE", "CLUSTER", "GLOBAL_CLUSTER"]
                        },
                        "metric_names": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Metrics to summarize. Defaults to the standard set for the resource type"
                        },
                        "start_date": { "type": "string", "description": "ISO 8601 start, defaults to one hour ago" },
                        "end_date": { "type": "string", "description": "ISO 8601 end, defaults to now" },
                        "period": { "type": "integer", "minimum": 1, "description": "Aggregation period in seconds (default 60)" },
                        "stat": {
                            "type": "string",
                            "enum": ["SampleCount", "Sum", "Average", "Minimum", "Maximum"]
                        }
                    },
                    "required": ["resource_identifier", "resource_type"]
                }),
            },
            Tool {
                name: "DescribeRDSRecommendations".to_string(),
                description: "List RDS recommendations filtered by resource, status, severity and last update time.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "resource_id": { "type": "string" },
                        "status": { "type": "string", "enum": ["active", "pending", "resolved", "dismissed"] },
                        "severity": { "type": "string", "enum": ["high", "medium", "low", "informational"] },
                        "last_updated_after": { "type": "string", "description": "ISO 8601 timestamp" },
                        "last_updated_before": { "type": "string", "description": "ISO 8601 timestamp" }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "FindSlowQueriesAndWaitEvents".to_string(),
                description: "Rank wait events or SQL statements by their contribution to database load using Performance Insights samples.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "dbi_resource_identifier": {
                            "type": "string",
                            "description": "DbiResourceId of the DB instance (db-XXXXXXXX)"
                        },
                        "dimension": {
                            "type": "string",
                            "enum": ["db.wait_event", "db.sql_tokenized", "db.sql"],
                            "description": "Dimension to group load by (default db.wait_event)"
                        },
                        "start_time": { "type": "string", "description": "ISO 8601 start, defaults to one hour ago" },
                        "end_time": { "type": "string", "description": "ISO 8601 end, defaults to now" },
                        "period_in_seconds": {
                            "type": "integer",
                            "enum": [1, 60, 300, 3600, 86400],
                            "description": "Sample granularity (default 300)"
                        },
                        "limit": { "type": "integer", "minimum": 1, "maximum": 50, "description": "Number of findings (default 10)" }
                    },
                    "required": ["dbi_resource_identifier"]
                }),
            },
            Tool {
                name: "ReadDBLogFiles".to_string(),
                description: "Read a page of a DB instance log file, optionally filtered by a substring or `re:` regular expression. Pass next_cursor back to continue.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "db_instance_identifier": { "type": "string" },
                        "log_file_name": { "type": "string", "description": "e.g. error/postgresql.log.2025-06-01-00" },
                        "pattern": { "type": "string", "description": "Substring, or regular expression prefixed with re:" },
                        "cursor": { "type": "string", "description": "next_cursor from a previous page; \"0\" starts at the beginning" },
                        "max_lines": { "type": "integer", "minimum": 1, "maximum": 9999, "description": "Lines to read (default 100)" }
                    },
                    "required": ["db_instance_identifier", "log_file_name"]
                }),
            },
        ];

        if !self.service.is_readonly() {
            tools.push(Tool {
                name: CREATE_REPORT_TOOL.to_string(),
                description: "Create a performance report combining metrics, ranked load findings and log excerpts for a window of 5 minutes to 6 days. Defaults to the window from 5 days ago to 2 days ago.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "dbi_resource_identifier": { "type": "string" },
                        "start_time": { "type": "string" },
                        "end_time": { "type": "string" },
                        "metric_names": { "type": "array", "items": { "type": "string" } },
                        "log_file_names": { "type": "array", "items": { "type": "string" } },
                        "log_pattern": { "type": "string" },
                        "tags": {
                            "type": "array",
                            "items": { "type": "object", "additionalProperties": { "type": "string" } },
                            "description": "Tags such as [{\"team\": \"db\"}]"
                        },
                        "timeout_seconds": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["dbi_resource_identifier"]
                }),
            });
        }
        tools
    }
}

/// リソースツール名と引数から URI を組み立てる。未知の名前は `None`
fn resource_tool_uri(name: &str, args: Value) -> Option<Result<ResourceUri>> {
    let uri = match name {
        "ListDBInstances" => Ok(ResourceUri::Instances),
        "ListDBClusters" => Ok(ResourceUri::Clusters),
        "DescribeDBInstance" => decode_args::<InstanceArgs>(args)
            .map(|a| ResourceUri::Instance(a.db_instance_identifier)),
        "DescribeDBCluster" => decode_args::<ClusterArgs>(args)
            .map(|a| ResourceUri::Cluster(a.db_cluster_identifier)),
        "ListDBLogFiles" => decode_args::<InstanceArgs>(args)
            .map(|a| ResourceUri::InstanceLogs(a.db_instance_identifier)),
        "ListPerformanceReports" => decode_args::<ReportListArgs>(args)
            .map(|a| ResourceUri::PerformanceReports(a.dbi_resource_identifier)),
        "ReadPerformanceReport" => {
            decode_args::<ReportArgs>(args).map(|a| ResourceUri::PerformanceReport {
                resource_id: a.dbi_resource_identifier,
                report_id: a.report_id,
            })
        }
        "ListCloudWatchMetrics" => decode_args::<MetricListArgs>(args).and_then(|a| {
            let resource_type = ResourceType::from_uri_segment(&a.resource_type).ok_or_else(|| {
                Error::InvalidParams(format!(
                    "resource_type must be db-instance or db-cluster, got '{}'",
                    a.resource_type
                ))
            })?;
            Ok(ResourceUri::CloudWatchMetrics {
                resource_type,
                resource_id: a.resource_identifier,
            })
        }),
        _ => return None,
    };
    Some(uri)
}

fn resource_tools() -> Vec<Tool> {
    let id_schema = |field: &str| {
        let mut properties = serde_json::Map::new();
        properties.insert(field.to_string(), json!({ "type": "string" }));
        json!({
            "type": "object",
            "properties": properties,
            "required": [field]
        })
    };
    let empty = json!({ "type": "object", "properties": {}, "required": [] });

    vec![
        Tool {
            name: "ListDBInstances".to_string(),
            description: "List all DB instances".to_string(),
            input_schema: empty.clone(),
        },
        Tool {
            name: "DescribeDBInstance".to_string(),
            description: "Describe one DB instance".to_string(),
            input_schema: id_schema("db_instance_identifier"),
        },
        Tool {
            name: "ListDBClusters".to_string(),
            description: "List all DB clusters".to_string(),
            input_schema: empty,
        },
        Tool {
            name: "DescribeDBCluster".to_string(),
            description: "Describe one DB cluster".to_string(),
            input_schema: id_schema("db_cluster_identifier"),
        },
        Tool {
            name: "ListDBLogFiles".to_string(),
            description: "List non-empty log files of a DB instance".to_string(),
            input_schema: id_schema("db_instance_identifier"),
        },
        Tool {
            name: "ListPerformanceReports".to_string(),
            description: "List performance reports of a DB instance".to_string(),
            input_schema: id_schema("dbi_resource_identifier"),
        },
        Tool {
            name: "ReadPerformanceReport".to_string(),
            description: "Read one performance report".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dbi_resource_identifier": { "type": "string" },
                    "report_id": { "type": "string" }
                },
                "required": ["dbi_resource_identifier", "report_id"]
            }),
        },
        Tool {
            name: "ListCloudWatchMetrics".to_string(),
            description: "List CloudWatch metrics available for a DB instance or cluster".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "resource_type": { "type": "string", "enum": ["db-instance", "db-cluster"] },
                    "resource_identifier": { "type": "string" }
                },
                "required": ["resource_type", "resource_identifier"]
            }),
        },
    ]
}

fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::InvalidParams(e.to_string()))
}

fn to_text<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn with_uri<T: Serialize>(value: &T, uri: ResourceUri) -> Result<Value> {
    let mut value = serde_json::to_value(value)?;
    if let Value::Object(map) = &mut value {
        map.insert("resource_uri".to_string(), Value::String(uri.to_string()));
    }
    Ok(value)
}

fn tool_result(name: &str, outcome: Result<String>) -> Value {
    match outcome {
        Ok(text) => json!({
            "content": [{ "type": "text", "text": text }],
            "isError": false
        }),
        Err(e) => {
            warn!("Tool {} failed ({}): {}", name, e.kind(), e);
            json!({
                "content": [{
                    "type": "text",
                    "text": json!({ "error": e.to_payload() }).to_string()
                }],
                "isError": true
            })
        }
    }
}

#[async_trait]
impl McpHandler for RdsMonitoringHandler {
    async fn initialize(&self, params: InitializeParams) -> std::result::Result<Value, McpError> {
        if let Some(client) = &params.client_info {
            info!("Initializing session for {} {}", client.name, client.version);
        }
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Amazon RDS monitoring: metrics, Performance Insights load analysis, logs, events, recommendations and performance reports. Read aws-rds://metrics-guide for metric definitions."
        }))
    }

    async fn list_tools(&self) -> std::result::Result<Vec<Tool>, McpError> {
        let mut tools = self.core_tools();
        if self.register_resources_as_tools {
            tools.extend(resource_tools());
        }
        Ok(tools)
    }

    async fn call_tool(&self, params: ToolCallParams) -> std::result::Result<Value, McpError> {
        debug!("Calling tool {}", params.name);
        let args = Value::Object(params.arguments.unwrap_or_default());
        match self.run_tool(&params.name, args).await {
            Some(outcome) => Ok(tool_result(&params.name, outcome)),
            None => Err(McpError::ToolNotFound(params.name)),
        }
    }

    async fn list_resources(&self) -> std::result::Result<Vec<Resource>, McpError> {
        Ok(static_resources())
    }

    async fn list_resource_templates(&self) -> std::result::Result<Vec<ResourceTemplate>, McpError> {
        Ok(resource_templates())
    }

    async fn read_resource(
        &self,
        params: ResourceReadParams,
    ) -> std::result::Result<Value, McpError> {
        let uri = ResourceUri::parse(&params.uri)?;
        let text = self.read_uri(&uri).await?.into_text()?;
        Ok(json!({
            "contents": [{
                "uri": params.uri,
                "mimeType": uri.mime_type(),
                "text": text
            }]
        }))
    }
}
