//! JSON-RPC server.
//!
//! Handles line-delimited JSON-RPC 2.0 over stdio. Serves the `mcp.list_tools`
//! / `mcp.use_tool` pair as well as the standard MCP methods.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::io::{BufRead, Write};
use tracing::debug;

use crate::error::{rpc_codes, NbError, Result};
use crate::session::NotebookSession;
use crate::tools::ToolRegistry;

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server information.
const SERVER_NAME: &str = "nbmcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, must be "2.0"
    pub jsonrpc: String,
    /// Request id; absent for notifications
    #[serde(default)]
    pub id: Option<JsonValue>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Option<JsonValue>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Id of the request answered; null when it could not be read
    pub id: JsonValue,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Structured details (`{"kind": ...}` for tool errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonValue>, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(JsonValue::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<JsonValue>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(JsonValue::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    /// Create an error response from an NbError.
    pub fn from_error(id: Option<JsonValue>, err: NbError) -> Self {
        let mut response = Self::error(id, err.rpc_code(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.data = Some(serde_json::json!({ "kind": err.kind() }));
        }
        response
    }
}

/// Notebook tool server.
pub struct McpServer {
    session: NotebookSession,
    registry: ToolRegistry,
    initialized: bool,
}

impl McpServer {
    /// Create a new server with the given session.
    pub fn new(session: NotebookSession) -> Self {
        Self {
            session,
            registry: ToolRegistry::new(),
            initialized: false,
        }
    }

    /// The session the server acts on.
    pub fn session(&self) -> &NotebookSession {
        &self.session
    }

    /// Whether an `initialize` request has been answered.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the server, reading from stdin and writing to stdout.
    pub fn run_sync(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.serve(stdin.lock(), stdout.lock())
    }

    /// Serve requests from `reader` until EOF, one response line per request.
    pub fn serve<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<()> {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let bytes_read = reader.read_until(b'\n', &mut buf)?;

            if bytes_read == 0 {
                // EOF - client disconnected
                break;
            }

            let response = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle_line(line.trim()),
                Err(e) => Some(JsonRpcResponse::error(
                    None,
                    rpc_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                )),
            };
            let Some(response) = response else {
                continue;
            };

            let response_json = serde_json::to_string(&response)?;
            writeln!(writer, "{}", response_json)?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Handle one input line; `None` when nothing should be written back.
    pub fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        if line.is_empty() {
            return None;
        }
        let value: JsonValue = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    None,
                    rpc_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        };
        if !value.is_object() {
            return Some(JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                "Parse error: request must be a JSON object".to_string(),
            ));
        }

        // Keep the id so a malformed request is still answered under it
        let id = value.get("id").cloned().filter(|id| !id.is_null());
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request),
            Err(e) => Some(JsonRpcResponse::error(
                id,
                rpc_codes::INVALID_REQUEST,
                format!("Invalid request: {}", e),
            )),
        }
    }

    /// Handle a single JSON-RPC request.
    fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, id = ?request.id, "request");

        // Validate JSON-RPC version
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                rpc_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version".to_string(),
            ));
        }

        let response = match request.method.as_str() {
            "mcp.list_tools" => self.handle_list_tools(request),
            "mcp.use_tool" => self.handle_use_tool(request),
            "initialize" => self.handle_initialize(request),
            "initialized" | "notifications/initialized" => {
                // Notifications get no reply
                request.id.as_ref()?;
                JsonRpcResponse::success(request.id, JsonValue::Null)
            }
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request),
            "ping" => JsonRpcResponse::success(request.id, serde_json::json!({})),
            _ => JsonRpcResponse::error(
                request.id,
                rpc_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
            ),
        };
        Some(response)
    }

    /// Handle the initialize request.
    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        self.initialized = true;

        JsonRpcResponse::success(
            request.id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    fn tool_list(&self) -> JsonValue {
        serde_json::to_value(self.registry.tools()).unwrap_or_else(|_| JsonValue::Array(Vec::new()))
    }

    /// Handle `mcp.list_tools`: the bare list of tool definitions.
    fn handle_list_tools(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(request.id, self.tool_list())
    }

    /// Handle the tools/list request.
    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(request.id, serde_json::json!({ "tools": self.tool_list() }))
    }

    /// Handle `mcp.use_tool`: params `{tool_name, parameters}`, bare result.
    fn handle_use_tool(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        match self.call_from_params(&request.params, "tool_name", "parameters") {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(err) => JsonRpcResponse::from_error(request.id, err),
        }
    }

    /// Handle the tools/call request.
    fn handle_tools_call(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        match self.call_from_params(&request.params, "name", "arguments") {
            Ok(result) => {
                // MCP tool responses are wrapped in content array
                let text = serde_json::to_string(&result).unwrap_or_else(|_| "null".to_string());
                JsonRpcResponse::success(
                    request.id,
                    serde_json::json!({
                        "content": [{
                            "type": "text",
                            "text": text
                        }],
                        "isError": false
                    }),
                )
            }
            Err(err) => JsonRpcResponse::from_error(request.id, err),
        }
    }

    /// Extract a tool name and argument object from `params` and dispatch.
    fn call_from_params(
        &mut self,
        params: &Option<JsonValue>,
        name_key: &str,
        args_key: &str,
    ) -> Result<JsonValue> {
        let params = match params {
            Some(JsonValue::Object(obj)) => obj,
            _ => return Err(NbError::invalid_params("Missing params object")),
        };

        let name = params
            .get(name_key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| NbError::invalid_params(format!("Missing '{}' in params", name_key)))?;

        let arguments = match params.get(args_key) {
            Some(JsonValue::Object(obj)) => obj.clone(),
            Some(JsonValue::Null) | None => Map::new(),
            _ => {
                return Err(NbError::invalid_params(format!(
                    "'{}' must be an object",
                    args_key
                )))
            }
        };

        self.registry.dispatch(&mut self.session, name, arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CellRun, ExecutionRequest, KernelClient};
    use crate::session::SessionConfig;
    use crate::workspace::Workspace;
    use serde_json::json;

    struct NoKernel;

    impl KernelClient for NoKernel {
        fn execute(&mut self, _request: &ExecutionRequest) -> Result<Vec<CellRun>> {
            Err(NbError::Kernel("no kernel in tests".into()))
        }
    }

    fn server(dir: &std::path::Path) -> McpServer {
        let session = NotebookSession::new(
            Workspace::new(dir),
            Box::new(NoKernel),
            SessionConfig::default(),
        );
        McpServer::new(session)
    }

    fn roundtrip(server: &mut McpServer, input: &str) -> Vec<JsonValue> {
        let mut out = Vec::new();
        server.serve(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(Some(JsonValue::Number(1.into())), json!({"ok": true}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(Some(JsonValue::Number(1.into())), -32600, "Invalid".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_error_carries_kind() {
        let err = NbError::CellNotFound("index 9 out of range".into());
        let json = serde_json::to_value(JsonRpcResponse::from_error(Some(json!(4)), err)).unwrap();
        assert_eq!(json["id"], json!(4));
        assert_eq!(json["error"]["code"], json!(rpc_codes::INTERNAL_ERROR));
        assert_eq!(json["error"]["data"]["kind"], json!("cell_not_found"));
    }

    #[test]
    fn test_parse_error_keeps_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = "{not json\n\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n";
        let responses = roundtrip(&mut srv, input);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], JsonValue::Null);
        assert_eq!(responses[0]["error"]["code"], json!(rpc_codes::PARSE_ERROR));
        assert_eq!(responses[1]["id"], json!(2));
        assert_eq!(responses[1]["result"], json!({}));
    }

    #[test]
    fn test_invalid_utf8_keeps_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"ping\"}\n");

        let mut out = Vec::new();
        srv.serve(input.as_slice(), &mut out).unwrap();
        let responses: Vec<JsonValue> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], JsonValue::Null);
        assert_eq!(responses[0]["error"]["code"], json!(rpc_codes::PARSE_ERROR));
        assert_eq!(responses[1]["id"], json!(5));
        assert_eq!(responses[1]["result"], json!({}));
    }

    #[test]
    fn test_malformed_request_keeps_its_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":7,\"params\":{}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":\"abc\",\"method\":42}\n",
            "[1, 2]\n",
        );
        let responses = roundtrip(&mut srv, input);
        assert_eq!(responses[0]["id"], json!(7));
        assert_eq!(responses[0]["error"]["code"], json!(rpc_codes::INVALID_REQUEST));
        assert_eq!(responses[1]["id"], json!("abc"));
        assert_eq!(responses[1]["error"]["code"], json!(rpc_codes::INVALID_REQUEST));
        assert_eq!(responses[2]["id"], JsonValue::Null);
        assert_eq!(responses[2]["error"]["code"], json!(rpc_codes::PARSE_ERROR));
    }

    #[test]
    fn test_wrong_version_and_unknown_method() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = concat!(
            "{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"ping\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"mcp.launch\"}\n",
        );
        let responses = roundtrip(&mut srv, input);
        assert_eq!(responses[0]["error"]["code"], json!(rpc_codes::INVALID_REQUEST));
        assert_eq!(responses[1]["error"]["code"], json!(rpc_codes::METHOD_NOT_FOUND));
    }

    #[test]
    fn test_list_tools_both_flavours() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"mcp.list_tools\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n",
        );
        let responses = roundtrip(&mut srv, input);
        let bare = responses[0]["result"].as_array().unwrap();
        assert!(bare.iter().any(|t| t["name"] == "add_cell"));
        assert_eq!(&responses[1]["result"]["tools"], &responses[0]["result"]);
    }

    #[test]
    fn test_use_tool_and_tools_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"mcp.use_tool\",",
            "\"params\":{\"tool_name\":\"create_notebook\",\"parameters\":{\"notebook_path\":\"a.ipynb\"}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",",
            "\"params\":{\"name\":\"list_cells\",\"arguments\":{\"notebook_path\":\"a.ipynb\"}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"mcp.use_tool\",",
            "\"params\":{\"tool_name\":\"read_cell\",\"parameters\":{\"notebook_path\":\"a.ipynb\",\"cell_index\":0}}}\n",
        );
        let responses = roundtrip(&mut srv, input);
        assert_eq!(responses[0]["result"]["success"], json!(true));
        assert!(dir.path().join("a.ipynb").is_file());

        let text = responses[1]["result"]["content"][0]["text"].as_str().unwrap();
        let listed: JsonValue = serde_json::from_str(text).unwrap();
        assert_eq!(listed["cell_count"], json!(0));
        assert_eq!(responses[1]["result"]["isError"], json!(false));

        assert_eq!(responses[2]["error"]["data"]["kind"], json!("cell_not_found"));
    }

    #[test]
    fn test_use_tool_bad_params() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"mcp.use_tool\",\"params\":{\"parameters\":{}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"mcp.use_tool\",\"params\":{\"tool_name\":\"nope\"}}\n",
        );
        let responses = roundtrip(&mut srv, input);
        assert_eq!(responses[0]["error"]["code"], json!(rpc_codes::INVALID_PARAMS));
        assert_eq!(responses[1]["error"]["code"], json!(rpc_codes::INVALID_PARAMS));
        assert_eq!(responses[1]["error"]["data"]["kind"], json!("unknown_tool"));
    }

    #[test]
    fn test_initialize_and_notification() {
        let dir = tempfile::tempdir().unwrap();
        let mut srv = server(dir.path());
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{}}\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        );
        let responses = roundtrip(&mut srv, input);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!("nbmcp"));
        assert!(srv.is_initialized());
    }
}
