//! `rmcp`-backed session over SSE or a child process

use super::{ClientIdentity, InitSummary, Session, SessionState};
use crate::config::{EndpointConfig, TransportConfig};
use crate::error::{OrchestratorError, Result};
use crate::notify::NotificationSink;
use crate::registry::ToolInfo;
use crate::report::CallResult;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use rmcp::{
    ClientHandler, RoleClient, ServiceExt,
    model::{
        CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation,
        LoggingMessageNotificationParam, ProtocolVersion,
    },
    service::{NotificationContext, RunningService},
    transport::{SseClientTransport, TokioChildProcess, sse_client::SseClientConfig},
};

const LOGGING_MESSAGE_METHOD: &str = "notifications/message";
const TOOL_LIST_CHANGED_METHOD: &str = "notifications/tools/list_changed";

/// Client-side handler: announces our identity and forwards pushed notifications
#[derive(Clone)]
pub struct RouteClientHandler {
    endpoint: String,
    info: ClientInfo,
    sink: Option<NotificationSink>,
}

impl RouteClientHandler {
    fn new(endpoint: &str, client: &ClientIdentity, sink: Option<NotificationSink>) -> Self {
        let info = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: client.name.clone(),
                version: client.version.clone(),
                ..Default::default()
            },
        };
        Self {
            endpoint: endpoint.to_string(),
            info,
            sink,
        }
    }

    /// Push a server log message into the notification channel
    fn forward_log(&self, params: LoggingMessageNotificationParam) -> bool {
        self.forward(LOGGING_MESSAGE_METHOD, params.data)
    }

    /// Push a tool-list-changed event into the notification channel
    fn forward_tool_list_changed(&self) -> bool {
        info!(endpoint = %self.endpoint, "Endpoint reported a changed tool list");
        self.forward(
            TOOL_LIST_CHANGED_METHOD,
            json!({"name": "tool_list_changed", "output": {}}),
        )
    }

    fn forward(&self, method: &str, payload: Value) -> bool {
        match &self.sink {
            Some(sink) => sink.push(method, payload),
            None => {
                debug!(endpoint = %self.endpoint, method, "No notification sink, ignoring");
                false
            }
        }
    }
}

impl ClientHandler for RouteClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward_log(params);
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward_tool_list_changed();
    }
}

type RunningClient = RunningService<RoleClient, RouteClientHandler>;

/// Where the connection is in its lifecycle, holding whatever that stage owns
///
/// Pending transports sit behind a `Mutex` only so the session is `Sync`; they
/// are reached through `&mut self` and never locked.
enum Link {
    /// SSE endpoint, URL validated but nothing opened yet
    SseUrl(Url),
    /// SSE event stream open, handshake pending
    SseStream(Mutex<SseClientTransport<reqwest::Client>>),
    /// Child process spawned, handshake pending
    Child(Mutex<TokioChildProcess>),
    Running(RunningClient),
    Closed,
}

/// Live connection to one MCP endpoint
pub struct McpSession {
    endpoint: String,
    link: Link,
    child_started: bool,
    sink: Option<NotificationSink>,
}

impl McpSession {
    /// Build the transport for `config`
    ///
    /// Subprocess endpoints are spawned here; SSE endpoints only have their URL checked.
    pub fn connect(config: &EndpointConfig) -> Result<Self> {
        let construction = |message: String| OrchestratorError::Construction {
            endpoint: config.name().to_string(),
            message,
        };

        let link = match config.transport() {
            TransportConfig::Sse { url } => {
                let url = Url::parse(url)
                    .map_err(|e| construction(format!("invalid URL '{}': {}", url, e)))?;
                Link::SseUrl(url)
            }
            TransportConfig::Subprocess { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args).envs(env.iter());
                let transport = TokioChildProcess::new(cmd).map_err(|e| {
                    construction(format!("failed to spawn '{}': {}", command, e))
                })?;
                Link::Child(Mutex::new(transport))
            }
        };

        Ok(Self {
            endpoint: config.name().to_string(),
            link,
            child_started: false,
            sink: None,
        })
    }

    fn out_of_order(&self, operation: &str) -> OrchestratorError {
        OrchestratorError::Session(format!(
            "cannot {} endpoint '{}' in state {:?}",
            operation,
            self.endpoint,
            self.state()
        ))
    }

    fn running(&self, operation: &str) -> Result<&RunningClient> {
        match &self.link {
            Link::Running(service) => Ok(service),
            _ => Err(self.out_of_order(operation)),
        }
    }

    fn summarize(service: &RunningClient) -> Result<InitSummary> {
        match service.peer_info() {
            Some(server_info) => Ok(InitSummary::from_value(&serde_json::to_value(server_info)?)),
            None => Ok(InitSummary::default()),
        }
    }
}

fn unwrap_pending<T>(transport: Mutex<T>) -> Result<T> {
    transport
        .into_inner()
        .map_err(|_| OrchestratorError::Session("pending transport lock poisoned".to_string()))
}

#[async_trait]
impl Session for McpSession {
    async fn start(&mut self) -> Result<()> {
        match &self.link {
            Link::SseUrl(url) => {
                let url = url.clone();
                let sse_config = SseClientConfig {
                    sse_endpoint: url.as_str().into(),
                    ..Default::default()
                };
                let transport =
                    SseClientTransport::start_with_client(reqwest::Client::new(), sse_config)
                        .await
                        .map_err(|e| {
                            OrchestratorError::Session(format!(
                                "failed to open SSE stream at {}: {}",
                                url, e
                            ))
                        })?;
                self.link = Link::SseStream(Mutex::new(transport));
                debug!(endpoint = %self.endpoint, "SSE stream opened");
                Ok(())
            }
            // Spawned at construction.
            Link::Child(_) if !self.child_started => {
                self.child_started = true;
                debug!(endpoint = %self.endpoint, "Child process ready");
                Ok(())
            }
            _ => Err(self.out_of_order("start")),
        }
    }

    async fn initialize(&mut self, client: &ClientIdentity) -> Result<InitSummary> {
        let handler = RouteClientHandler::new(&self.endpoint, client, self.sink.clone());

        let service = match std::mem::replace(&mut self.link, Link::Closed) {
            Link::SseStream(transport) => handler.serve(unwrap_pending(transport)?).await,
            Link::Child(transport) if self.child_started => {
                handler.serve(unwrap_pending(transport)?).await
            }
            other => {
                self.link = other;
                return Err(self.out_of_order("initialize"));
            }
        }
        .map_err(|e| OrchestratorError::Session(format!("handshake failed: {}", e)))?;

        let summary = Self::summarize(&service)?;
        self.link = Link::Running(service);
        Ok(summary)
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let service = self.running("list tools on")?;
        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| OrchestratorError::Session(format!("Failed to list tools: {}", e)))?;
        Ok(tools.into_iter().map(ToolInfo::from_rmcp).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallResult> {
        let service = self.running("call a tool on")?;
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: Some(arguments),
        };

        let result = service
            .call_tool(request)
            .await
            .map_err(|e| OrchestratorError::Session(format!("Tool call failed: {}", e)))?;

        CallResult::from_rmcp(&result)
    }

    async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Running(service) => {
                service.cancel().await.map_err(|e| {
                    OrchestratorError::Session(format!("failed to shut down service: {}", e))
                })?;
                Ok(())
            }
            // Dropping the transport ends the stream or kills the child.
            Link::SseUrl(_) | Link::SseStream(_) | Link::Child(_) => Ok(()),
            Link::Closed => Err(self.out_of_order("close")),
        }
    }

    fn set_notification_sink(&mut self, sink: NotificationSink) {
        self.sink = Some(sink);
    }

    fn state(&self) -> SessionState {
        match &self.link {
            Link::SseUrl(_) => SessionState::Constructed,
            Link::Child(_) if !self.child_started => SessionState::Constructed,
            Link::SseStream(_) | Link::Child(_) => SessionState::Started,
            Link::Running(_) => SessionState::Initialized,
            Link::Closed => SessionState::Closed,
        }
    }
}
