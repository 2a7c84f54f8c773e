//! # rds-monitoring-mcp
//!
//! Model Context Protocol (MCP) server for Amazon RDS monitoring.
//!
//! CloudWatch メトリクス、Performance Insights の負荷分析、DB ログ、
//! RDS イベントと推奨事項を MCP のツール・リソースとして公開し、
//! それらをまとめたパフォーマンスレポートを生成する。

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod mcp;
pub mod monitoring;

pub use error::{Error, Result};
pub use handlers::RdsMonitoringHandler;
pub use mcp::McpServer;
pub use monitoring::RdsMonitoringService;
