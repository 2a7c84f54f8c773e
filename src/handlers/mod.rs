//! MCP handlers
//!
//! 監視サービスを MCP のツールとリソースとして公開するハンドラー

pub mod rds;
pub mod resource_uri;

pub use rds::RdsMonitoringHandler;
pub use resource_uri::{ResourceUri, URI_SCHEME};
