//! Session abstraction: one live connection to one endpoint
//!
//! The orchestrator only talks to endpoints through [`Session`]. The production
//! implementation is [`McpSession`], backed by the `rmcp` SDK.

pub mod mcp;

use crate::error::Result;
use crate::notify::NotificationSink;
use crate::registry::ToolInfo;
use crate::report::CallResult;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use mcp::McpSession;

/// Identity announced to endpoints during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Handshake metadata returned by an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InitSummary {
    pub server_name: String,
    pub server_version: String,
    pub protocol_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitSummary {
    /// Read the fields we keep from the JSON form of an `InitializeResult`
    pub fn from_value(value: &Value) -> Self {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();
        let server_info = value.get("serverInfo");

        Self {
            server_name: text(server_info.and_then(|info| info.get("name"))),
            server_version: text(server_info.and_then(|info| info.get("version"))),
            protocol_version: text(value.get("protocolVersion")),
            instructions: value
                .get("instructions")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Lifecycle position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Constructed,
    Started,
    Initialized,
    Closed,
}

/// One connection to one endpoint
///
/// Calls must follow `start` → `initialize` → `list_tools`/`call_tool` → `close`.
/// `list_tools` and `call_tool` take `&self` so dispatch can run concurrently.
#[async_trait]
pub trait Session: Send + Sync {
    /// Open the underlying transport
    async fn start(&mut self) -> Result<()>;

    /// Perform the protocol handshake
    async fn initialize(&mut self, client: &ClientIdentity) -> Result<InitSummary>;

    /// Fetch the endpoint's tool catalog
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    /// Invoke one tool with the given arguments, passed through unmodified
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallResult>;

    /// Close the transport
    async fn close(&mut self) -> Result<()>;

    /// Register where pushed notifications go; must be set before `initialize`
    fn set_notification_sink(&mut self, sink: NotificationSink);

    fn state(&self) -> SessionState;
}
