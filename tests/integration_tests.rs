//! JSON-RPC flow through the MCP server and the RDS monitoring handler

mod common;

use common::{demo_service, writable_settings};
use rds_monitoring_mcp::mcp::{JsonRpcRequest, JsonRpcResponse, McpServer};
use rds_monitoring_mcp::monitoring::ServiceSettings;
use rds_monitoring_mcp::RdsMonitoringHandler;
use serde_json::{json, Value};
use std::sync::Arc;

fn server(settings: ServiceSettings, resources_as_tools: bool) -> McpServer {
    let handler = RdsMonitoringHandler::new(Arc::new(demo_service(settings)))
        .with_resources_as_tools(resources_as_tools);
    McpServer::new(Arc::new(handler))
}

async fn call(server: &McpServer, method: &str, params: Value) -> JsonRpcResponse {
    let line = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }).to_string();
    server.process_request(&line).await.unwrap()
}

/// `tools/call` の結果から (isError, 本文 JSON) を取り出す
async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> (bool, Value) {
    let response = call(
        server,
        "tools/call",
        json!({ "name": name, "arguments": arguments }),
    )
    .await;
    assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
    let result = response.result.unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    (
        result["isError"].as_bool().unwrap(),
        serde_json::from_str(text).unwrap(),
    )
}

async fn read_resource(server: &McpServer, uri: &str) -> JsonRpcResponse {
    call(server, "resources/read", json!({ "uri": uri })).await
}

fn tool_names(response: &JsonRpcResponse) -> Vec<String> {
    response.result.as_ref().unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_json_rpc_request_parsing() {
    let json = r#"
    {
        "jsonrpc": "2.0",
        "method": "tools/list",
        "id": 1
    }"#;

    let request: JsonRpcRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.jsonrpc, "2.0");
    assert_eq!(request.method, "tools/list");
    assert_eq!(request.id, Some(json!(1)));
    assert!(request.params.is_none());
}

#[tokio::test]
async fn test_initialize_advertises_server() {
    let server = server(ServiceSettings::default(), false);
    let response = call(
        &server,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "0.1.0" }
        }),
    )
    .await;

    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "rds-monitoring-mcp");
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(result["capabilities"]["resources"].is_object());
}

#[tokio::test]
async fn test_readonly_hides_report_tool() {
    let readonly = call(&server(ServiceSettings::default(), false), "tools/list", Value::Null).await;
    let names = tool_names(&readonly);
    assert_eq!(names.len(), 5);
    assert!(!names.iter().any(|n| n == "CreatePerformanceReport"));

    let writable = call(&server(writable_settings(), false), "tools/list", Value::Null).await;
    assert!(tool_names(&writable).iter().any(|n| n == "CreatePerformanceReport"));
}

#[tokio::test]
async fn test_tool_success_and_tool_error() {
    let server = server(ServiceSettings::default(), false);

    let (is_error, body) = call_tool(
        &server,
        "DescribeRDSPerformanceMetrics",
        json!({
            "resource_identifier": "demo-primary",
            "resource_type": "INSTANCE",
            "metric_names": ["CPUUtilization"],
            "start_date": "2025-06-01T00:00:00Z",
            "end_date": "2025-06-01T01:00:00Z",
            "period": 300
        }),
    )
    .await;
    assert!(!is_error);
    assert_eq!(body["metrics"][0]["metric_name"], "CPUUtilization");
    assert_eq!(body["metrics"][0]["max_value"], 62.5);

    let (is_error, body) = call_tool(
        &server,
        "FindSlowQueriesAndWaitEvents",
        json!({ "dbi_resource_identifier": "db-DEMOPRIMARY", "limit": 0 }),
    )
    .await;
    assert!(is_error);
    assert_eq!(body["error"]["kind"], "invalid_params");

    let (is_error, body) = call_tool(
        &server,
        "DescribeRDSEvents",
        json!({ "source_identifier": "demo-primary", "source_type": "db-instance", "duration": 0 }),
    )
    .await;
    assert!(is_error);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_readonly_refuses_report_tool_call() {
    let server = server(ServiceSettings::default(), false);
    let (is_error, body) = call_tool(
        &server,
        "CreatePerformanceReport",
        json!({ "dbi_resource_identifier": "db-DEMOPRIMARY" }),
    )
    .await;
    assert!(is_error);
    assert_eq!(body["error"]["kind"], "readonly");
}

#[tokio::test]
async fn test_unknown_tool_is_protocol_error() {
    let server = server(ServiceSettings::default(), false);
    let response = call(
        &server,
        "tools/call",
        json!({ "name": "ListDBInstances", "arguments": {} }),
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_report_created_then_read_as_resource() {
    let server = server(writable_settings(), false);
    let (is_error, created) = call_tool(
        &server,
        "CreatePerformanceReport",
        json!({
            "dbi_resource_identifier": "db-DEMOPRIMARY",
            "start_time": "2025-06-01T00:00:00Z",
            "end_time": "2025-06-01T06:00:00Z",
            "metric_names": ["CPUUtilization"],
            "tags": [{ "ticket": "OPS-12" }]
        }),
    )
    .await;
    assert!(!is_error, "{}", created);
    let uri = created["resource_uri"].as_str().unwrap();
    assert_eq!(
        uri,
        "aws-rds://db-instance/db-DEMOPRIMARY/performance_report/report-00000001"
    );

    let result = read_resource(&server, uri).await.result.unwrap();
    let contents = &result["contents"][0];
    assert_eq!(contents["mimeType"], "application/json");
    let report: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
    assert_eq!(report["tags"]["ticket"], "OPS-12");

    let listing = read_resource(&server, "aws-rds://db-instance/db-DEMOPRIMARY/performance_report").await;
    let listing: Value =
        serde_json::from_str(listing.result.unwrap()["contents"][0]["text"].as_str().unwrap())
            .unwrap();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["reports"][0]["resource_uri"], uri);
}

#[tokio::test]
async fn test_resources_and_templates_listed() {
    let server = server(ServiceSettings::default(), false);

    let resources = call(&server, "resources/list", Value::Null).await.result.unwrap();
    let uris: Vec<&str> = resources["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap())
        .collect();
    assert!(uris.contains(&"aws-rds://db-instance"));
    assert!(uris.contains(&"aws-rds://metrics-guide"));

    let templates = call(&server, "resources/templates/list", Value::Null)
        .await
        .result
        .unwrap();
    assert!(templates["resourceTemplates"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["uriTemplate"] == "aws-rds://db-instance/{instance_id}/log"));
}

#[tokio::test]
async fn test_read_instance_resources() {
    let server = server(ServiceSettings::default(), false);

    let response = read_resource(&server, "aws-rds://db-instance").await;
    let text = response.result.unwrap()["contents"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(
        body["instances"][0]["resource_uri"],
        "aws-rds://db-instance/demo-primary"
    );

    let response = read_resource(&server, "aws-rds://db-instance/demo-primary/log").await;
    let text = response.result.unwrap()["contents"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_metrics_guide_is_markdown() {
    let server = server(ServiceSettings::default(), false);
    let result = read_resource(&server, "aws-rds://metrics-guide").await.result.unwrap();
    let contents = &result["contents"][0];
    assert_eq!(contents["mimeType"], "text/markdown");
    assert!(contents["text"].as_str().unwrap().starts_with('#'));
}

#[tokio::test]
async fn test_unknown_resources() {
    let server = server(ServiceSettings::default(), false);

    let error = read_resource(&server, "aws-rds://db-proxy").await.error.unwrap();
    assert_eq!(error.code, -32002);
    assert_eq!(error.data.unwrap()["uri"], "aws-rds://db-proxy");

    let error = read_resource(&server, "aws-rds://db-instance/nope").await.error.unwrap();
    assert_eq!(error.code, -32002);
    assert_eq!(error.data.unwrap()["kind"], "not_found");
}

#[tokio::test]
async fn test_resources_exposed_as_tools() {
    let server = server(ServiceSettings::default(), true);

    let names = tool_names(&call(&server, "tools/list", Value::Null).await);
    assert_eq!(names.len(), 13);

    let (is_error, body) = call_tool(
        &server,
        "DescribeDBCluster",
        json!({ "db_cluster_identifier": "demo-cluster" }),
    )
    .await;
    assert!(!is_error);
    assert_eq!(body["resource_uri"], "aws-rds://db-cluster/demo-cluster");
    assert_eq!(body["members"].as_array().unwrap().len(), 2);

    let (is_error, body) = call_tool(
        &server,
        "ListCloudWatchMetrics",
        json!({ "resource_type": "db-proxy", "resource_identifier": "x" }),
    )
    .await;
    assert!(is_error);
    assert_eq!(body["error"]["kind"], "invalid_params");
}

#[tokio::test]
async fn test_ping_and_notifications() {
    let server = server(ServiceSettings::default(), false);
    let pong = call(&server, "ping", Value::Null).await;
    assert_eq!(pong.result, Some(json!({})));

    let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    assert!(server.process_request(&notification.to_string()).await.is_none());
}
