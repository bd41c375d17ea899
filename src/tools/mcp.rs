//! MCP 工具服务器客户端（stdio，按行分隔的 JSON-RPC 2.0）
//!
//! 每个启用的服务器启动为子进程：initialize 握手 → notifications/initialized → tools/list，
//! 远端工具包装为 McpTool，call 时发 tools/call。一个服务器一条连接，放在 Mutex 后面
//! （stdio 管道同一时刻只能有一个请求在途），不同服务器的调用可以并发。
//! 同一服务器的工具共享一个 CallLane，调度器排队拿到它之后才开始单次调用的超时计时。

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::core::ChatError;
use crate::tools::{CallLane, Tool, ToolDiscovery};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// 远端工具的元数据（tools/list 的一项）
#[derive(Clone, Debug)]
struct RemoteTool {
    name: String,
    description: String,
    input_schema: Value,
}

/// 到单个 MCP 服务器进程的连接
pub struct McpConnection {
    server: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
}

impl McpConnection {
    /// 启动服务器进程并完成握手
    pub async fn connect(server: &str, config: &ServerConfig) -> Result<Self, String> {
        tracing::info!(server = %server, command = %config.command, "spawning MCP server");

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn '{}': {}", config.command, e))?;
        let stdin = child.stdin.take().ok_or("stdin was not piped")?;
        let stdout = child.stdout.take().ok_or("stdout was not piped")?;

        let mut conn = Self {
            server: server.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        };
        conn.initialize().await?;
        Ok(conn)
    }

    async fn initialize(&mut self) -> Result<(), String> {
        let response = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
            .await?;
        tracing::debug!(server = %self.server, response = %response, "MCP initialize response");
        self.notify("notifications/initialized", json!({})).await
    }

    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, String> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .ok_or_else(|| format!("tools/list returned no tools array: {}", result))?;

        let mut out = Vec::with_capacity(tools.len());
        for tool in tools {
            let name = tool
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| format!("tool without a name: {}", tool))?;
            out.push(RemoteTool {
                name: name.to_string(),
                description: tool
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("")
                    .to_string(),
                input_schema: tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object" })),
            });
        }
        Ok(out)
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, String> {
        if !self.is_alive() {
            return Err(format!("MCP server '{}' has exited", self.server));
        }
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        decode_call_result(&result)
    }

    /// 发送请求并读取 id 匹配的响应；中途的通知与过期响应直接跳过
    async fn request(&mut self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id;
        self.next_id += 1;
        self.write_frame(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let mut line = String::new();
            let n = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| format!("failed to read from MCP server: {}", e))?;
            if n == 0 {
                return Err(format!("MCP server '{}' closed its stdout", self.server));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let frame: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(server = %self.server, "skipping non-JSON line from MCP server: {}", e);
                    continue;
                }
            };
            if frame.get("id").and_then(|v| v.as_i64()) != Some(id) {
                tracing::debug!(server = %self.server, frame = %frame, "skipping unrelated frame");
                continue;
            }
            if let Some(err) = frame.get("error") {
                return Err(format!("MCP server error on {}: {}", method, err));
            }
            return Ok(frame.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), String> {
        self.write_frame(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await
    }

    async fn write_frame(&mut self, frame: &Value) -> Result<(), String> {
        let line = format!("{}\n", frame);
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("failed to write to MCP server: {}", e))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| format!("failed to flush MCP server stdin: {}", e))
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// tools/call 结果：isError → Err(text)；structuredContent 优先；否则文本内容按 JSON 解析，失败则作为字符串
fn decode_call_result(result: &Value) -> Result<Value, String> {
    let text = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
        return Err(if text.is_empty() { result.to_string() } else { text });
    }
    if let Some(structured) = result.get("structuredContent") {
        if !structured.is_null() {
            return Ok(structured.clone());
        }
    }
    if text.is_empty() {
        return Ok(result.clone());
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// 远端工具句柄；同一服务器的工具共享连接与通道
pub struct McpTool {
    meta: RemoteTool,
    connection: Arc<Mutex<McpConnection>>,
    lane: CallLane,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn parameters_schema(&self) -> Value {
        self.meta.input_schema.clone()
    }

    fn call_lane(&self) -> Option<CallLane> {
        Some(Arc::clone(&self.lane))
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let mut conn = self.connection.lock().await;
        conn.call_tool(&self.meta.name, args).await
    }
}

/// 连接所有启用的服务器并枚举工具；任一服务器失败即为致命的 ToolDiscovery 错误
pub struct McpDiscovery {
    /// (服务器名, 已展开环境变量的配置)，按名称排序
    servers: Vec<(String, ServerConfig)>,
}

impl McpDiscovery {
    pub fn new(servers: Vec<(String, ServerConfig)>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolDiscovery for McpDiscovery {
    async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>, ChatError> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        for (server, config) in &self.servers {
            let mut conn = McpConnection::connect(server, config)
                .await
                .map_err(|e| ChatError::ToolDiscovery(format!("server '{}': {}", server, e)))?;
            let remote = conn
                .list_tools()
                .await
                .map_err(|e| ChatError::ToolDiscovery(format!("server '{}': {}", server, e)))?;
            tracing::info!(server = %server, tools = remote.len(), "MCP server connected");

            let connection = Arc::new(Mutex::new(conn));
            let lane = CallLane::default();
            for meta in remote {
                tools.push(Arc::new(McpTool {
                    meta,
                    connection: Arc::clone(&connection),
                    lane: Arc::clone(&lane),
                }));
            }
        }
        Ok(tools)
    }
}
