use crate::mcp::JsonRpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 監視サービスからのエラー
    #[error(transparent)]
    Monitoring(#[from] crate::Error),
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::InvalidRequest(msg) => JsonRpcError {
                code: -32600,
                message: format!("Invalid request: {}", msg),
                data: None,
            },
            McpError::MethodNotFound(msg) => JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", msg),
                data: None,
            },
            McpError::InvalidParams(msg) => JsonRpcError {
                code: -32602,
                message: format!("Invalid params: {}", msg),
                data: None,
            },
            McpError::ToolNotFound(name) => JsonRpcError {
                code: -32602,
                message: format!("Unknown tool: {}", name),
                data: None,
            },
            McpError::ResourceNotFound(uri) => JsonRpcError {
                code: -32002,
                message: format!("Resource not found: {}", uri),
                data: Some(serde_json::json!({ "uri": uri })),
            },
            McpError::Monitoring(e) => JsonRpcError {
                code: e.to_json_rpc_code(),
                message: e.to_string(),
                data: Some(serde_json::json!({ "kind": e.kind() })),
            },
            _ => JsonRpcError {
                code: -32603,
                message: err.to_string(),
                data: None,
            },
        }
    }
}
