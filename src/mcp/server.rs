use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::mcp::{
    InitializeParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpError, Resource,
    ResourceReadParams, ResourceTemplate, Tool, ToolCallParams,
};

#[async_trait]
pub trait McpHandler: Send + Sync {
    async fn initialize(&self, params: InitializeParams) -> Result<Value, McpError>;
    async fn list_tools(&self) -> Result<Vec<Tool>, McpError>;
    async fn call_tool(&self, params: ToolCallParams) -> Result<Value, McpError>;
    async fn list_resources(&self) -> Result<Vec<Resource>, McpError>;
    async fn read_resource(&self, params: ResourceReadParams) -> Result<Value, McpError>;

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, McpError> {
        Ok(Vec::new())
    }
}

/// 改行区切り JSON-RPC の MCP サーバー
#[derive(Clone)]
pub struct McpServer {
    handler: Arc<dyn McpHandler>,
}

impl McpServer {
    pub fn new(handler: Arc<dyn McpHandler>) -> Self {
        Self { handler }
    }

    /// TCP で待ち受け、接続ごとにタスクを起動する
    pub async fn run(&self, addr: &str) -> crate::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("MCP Server listening on {}", addr);
        self.run_listener(listener).await
    }

    pub async fn run_listener(&self, listener: TcpListener) -> crate::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Accepted connection from {}", peer);
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    error!("Error handling connection: {}", e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> crate::Result<()> {
        let (reader, writer) = stream.split();
        self.serve(BufReader::new(reader), writer).await
    }

    /// stdin/stdout で動作する（ログは stderr へ）
    pub async fn run_stdio(&self) -> crate::Result<()> {
        info!("MCP Server running on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// 1 行 1 メッセージで読み取り、応答を書き出す。EOF で終了
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> crate::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let Some(response) = self.process_request(&line).await else {
                continue;
            };

            let response_str = serde_json::to_string(&response)?;
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    /// 1 メッセージを処理する。通知には応答しない
    pub async fn process_request(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to parse JSON-RPC message: {}", e);
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError {
                        code: -32700,
                        message: format!("Parse error: {}", e),
                        data: None,
                    },
                ));
            }
        };

        let Some(id) = request.id.clone() else {
            debug!("Received notification {}", request.method);
            return None;
        };

        if request.jsonrpc != "2.0" {
            let err = McpError::InvalidRequest(format!(
                "unsupported jsonrpc version '{}'",
                request.jsonrpc
            ));
            return Some(JsonRpcResponse::failure(id, err.into()));
        }

        debug!("Handling {} (id {})", request.method, id);
        match self.dispatch(&request.method, request.params).await {
            Ok(result) => Some(JsonRpcResponse::success(id, result)),
            Err(e) => {
                warn!("{} failed: {}", request.method, e);
                Some(JsonRpcResponse::failure(id, e.into()))
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match method {
            "initialize" => {
                let params: InitializeParams = decode_params(params)?;
                self.handler.initialize(params).await
            }
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => {
                let tools = self.handler.list_tools().await?;
                Ok(serde_json::json!({ "tools": tools }))
            }
            "tools/call" => {
                let params: ToolCallParams = decode_params(params)?;
                self.handler.call_tool(params).await
            }
            "resources/list" => {
                let resources = self.handler.list_resources().await?;
                Ok(serde_json::json!({ "resources": resources }))
            }
            "resources/templates/list" => {
                let templates = self.handler.list_resource_templates().await?;
                Ok(serde_json::json!({ "resourceTemplates": templates }))
            }
            "resources/read" => {
                let params: ResourceReadParams = decode_params(params)?;
                self.handler.read_resource(params).await
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let value = match params {
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(value) => value,
    };
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl McpHandler for EchoHandler {
        async fn initialize(&self, _params: InitializeParams) -> Result<Value, McpError> {
            Ok(serde_json::json!({ "protocolVersion": crate::mcp::PROTOCOL_VERSION }))
        }

        async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
            Ok(vec![Tool {
                name: "Echo".to_string(),
                description: "Echo".to_string(),
                input_schema: serde_json::json!({ "type": "object" }),
            }])
        }

        async fn call_tool(&self, params: ToolCallParams) -> Result<Value, McpError> {
            match params.name.as_str() {
                "Echo" => Ok(serde_json::json!(params.arguments)),
                other => Err(McpError::ToolNotFound(other.to_string())),
            }
        }

        async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
            Ok(Vec::new())
        }

        async fn read_resource(&self, params: ResourceReadParams) -> Result<Value, McpError> {
            Err(McpError::ResourceNotFound(params.uri))
        }
    }

    fn server() -> McpServer {
        McpServer::new(Arc::new(EchoHandler))
    }

    #[tokio::test]
    async fn test_parse_error_response() {
        let response = server().process_request("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, -32700);
        assert_eq!(response.id, Value::Null);
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(server().process_request(line).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let line = r#"{"jsonrpc":"2.0","id":7,"method":"prompts/list"}"#;
        let response = server().process_request(line).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
        assert_eq!(response.id, serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_serve_over_duplex() {
        let (client, server_side) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_side);
        let task = tokio::spawn(async move {
            server()
                .serve(BufReader::new(server_read), server_write)
                .await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();
        client_write.shutdown().await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["result"], serde_json::json!({}));
        assert_eq!(second["result"]["tools"][0]["name"], "Echo");
        assert!(second["result"]["tools"][0]["inputSchema"].is_object());

        task.await.unwrap().unwrap();
    }
}
