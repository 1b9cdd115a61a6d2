//! Multi-endpoint orchestration core
//!
//! Drives every configured endpoint through a fixed lifecycle and routes tool
//! calls to whichever endpoint owns the tool:
//!
//! 1. [`Orchestrator::connect_all`] builds one session per endpoint (fatal on failure)
//! 2. [`Orchestrator::start_all`] opens transports, dropping endpoints that fail
//! 3. [`Orchestrator::initialize_all`] handshakes, dropping endpoints that fail
//! 4. [`Orchestrator::discover_all`] lists tools and rebuilds the routing table (fatal on failure)
//! 5. [`Orchestrator::call_tool`] dispatches `"<alias>.<tool>"` to the owning endpoint
//! 6. [`Orchestrator::close`] closes everything, best effort
//!
//! Stages 2 and 3 fan out across endpoints and fold results back into the
//! registry in a single join phase. Dispatch only reads the registry and
//! routing table, so `call_tool` may run concurrently once discovery is done.

use crate::config::OrchestratorConfig;
use crate::deadline::Deadline;
use crate::error::{OrchestratorError, Result};
use crate::notify::NotificationSink;
use crate::registry::{EndpointRecord, EndpointRegistry, RoutingTable};
use crate::report::CallResult;
use crate::session::{ClientIdentity, InitSummary, McpSession, Session};
use futures::future::{join_all, try_join_all};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Separator between the alias and tool segments of a tool identifier
pub const IDENTIFIER_DELIMITER: char = '.';

/// Outcome of closing every endpoint
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: Vec<String>,
    pub failures: Vec<(String, OrchestratorError)>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns every endpoint session and the routing table derived from them
pub struct Orchestrator {
    registry: EndpointRegistry,
    routes: RoutingTable,
    client: ClientIdentity,
    deadline: Deadline,
}

impl Orchestrator {
    /// Build one `rmcp` session per configured endpoint
    ///
    /// Any endpoint whose transport cannot be constructed aborts the whole startup.
    pub fn connect_all(
        config: &OrchestratorConfig,
        deadline: Deadline,
        notifications: &NotificationSink,
    ) -> Result<Self> {
        let sessions = config
            .endpoints
            .iter()
            .map(|endpoint| -> Result<(String, Box<dyn Session>)> {
                let session: Box<dyn Session> = Box::new(McpSession::connect(endpoint)?);
                Ok((endpoint.name().to_string(), session))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::with_sessions(
            sessions,
            config.client.clone(),
            deadline,
            notifications,
        ))
    }

    /// Build from already-constructed sessions, in processing order
    pub fn with_sessions(
        sessions: Vec<(String, Box<dyn Session>)>,
        client: ClientIdentity,
        deadline: Deadline,
        notifications: &NotificationSink,
    ) -> Self {
        let mut registry = EndpointRegistry::new();
        for (name, mut session) in sessions {
            session.set_notification_sink(notifications.for_endpoint(&name));
            registry.insert(EndpointRecord::new(name, session));
        }

        Self {
            registry,
            routes: RoutingTable::new(),
            client,
            deadline,
        }
    }

    /// Run start, handshake and discovery in order
    pub async fn bring_up(&mut self) -> Result<()> {
        self.start_all().await?;
        self.initialize_all().await?;
        self.discover_all().await
    }

    /// Start every session concurrently, dropping the ones that fail
    ///
    /// Returns the absorbed per-endpoint failures. Fails only when no endpoint survives.
    pub async fn start_all(&mut self) -> Result<Vec<OrchestratorError>> {
        let deadline = self.deadline.clone();
        let outcomes = join_all(self.registry.drain().into_iter().map(|mut record| {
            let deadline = deadline.clone();
            async move {
                let operation = format!("start endpoint '{}'", record.name);
                let outcome = deadline.run(&operation, record.session.start()).await;
                let outcome = outcome.map_err(|e| OrchestratorError::Start {
                    endpoint: record.name.clone(),
                    message: e.to_string(),
                });
                (record, outcome.map(|()| None))
            }
        }))
        .await;

        self.absorb(outcomes, "start").await
    }

    /// Handshake with every remaining session concurrently, dropping the ones that fail
    pub async fn initialize_all(&mut self) -> Result<Vec<OrchestratorError>> {
        let deadline = self.deadline.clone();
        let client = self.client.clone();
        let outcomes = join_all(self.registry.drain().into_iter().map(|mut record| {
            let deadline = deadline.clone();
            let client = client.clone();
            async move {
                let operation = format!("initialize endpoint '{}'", record.name);
                let outcome = deadline
                    .run(&operation, record.session.initialize(&client))
                    .await;
                let outcome = outcome.map_err(|e| OrchestratorError::Handshake {
                    endpoint: record.name.clone(),
                    message: e.to_string(),
                });
                (record, outcome.map(Some))
            }
        }))
        .await;

        self.absorb(outcomes, "initialize").await
    }

    /// Join phase shared by start and initialize: keep survivors, close and drop the rest
    async fn absorb(
        &mut self,
        outcomes: Vec<(EndpointRecord, Result<Option<InitSummary>>)>,
        stage: &'static str,
    ) -> Result<Vec<OrchestratorError>> {
        let mut dropped = Vec::new();
        let mut failed_records = Vec::new();

        for (mut record, outcome) in outcomes {
            match outcome {
                Ok(init) => {
                    if let Some(summary) = init {
                        info!(
                            endpoint = %record.name,
                            server = %summary.server_name,
                            version = %summary.server_version,
                            protocol = %summary.protocol_version,
                            "Initialization succeeded"
                        );
                        record.init = Some(summary);
                    }
                    self.registry.insert(record);
                }
                Err(e) => {
                    warn!(endpoint = %record.name, stage, error = %e, "Dropping endpoint");
                    dropped.push(e);
                    failed_records.push(record);
                }
            }
        }

        // Release whatever the failed sessions still hold.
        let deadline = self.deadline.clone();
        join_all(failed_records.into_iter().map(|mut record| {
            let deadline = deadline.clone();
            async move {
                if let Err(e) = deadline.run("close dropped endpoint", record.session.close()).await {
                    debug!(endpoint = %record.name, error = %e, "Closing dropped endpoint failed");
                }
            }
        }))
        .await;

        if self.registry.is_empty() {
            return Err(OrchestratorError::NoServersRunning { stage });
        }

        info!(stage, running = self.registry.len(), dropped = dropped.len(), "Stage complete");
        Ok(dropped)
    }

    /// List tools on every surviving endpoint and rebuild the routing table
    ///
    /// Unlike start and initialize, a failure here is not absorbed: the first
    /// endpoint that cannot list its tools fails the whole discovery.
    pub async fn discover_all(&mut self) -> Result<()> {
        let deadline = self.deadline.clone();
        let catalogs = try_join_all(self.registry.iter().map(|record| {
            let deadline = deadline.clone();
            async move {
                let operation = format!("list tools on endpoint '{}'", record.name);
                deadline
                    .run(&operation, record.session.list_tools())
                    .await
                    .map_err(|e| OrchestratorError::Discovery {
                        endpoint: record.name.clone(),
                        message: e.to_string(),
                    })
            }
        }))
        .await?;

        for (record, tools) in self.registry.iter_mut().zip(catalogs) {
            info!(endpoint = %record.name, tools = tools.len(), "Discovered tools");
            record.tools = tools;
        }

        self.routes = RoutingTable::from_registry(&self.registry);
        Ok(())
    }

    /// Per-endpoint tool catalogs as JSON, for prompt construction
    pub fn tools_as_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.registry.catalogs())?)
    }

    /// Dispatch one call shaped `"<alias>.<tool>"` to the endpoint owning `<tool>`
    ///
    /// Only the tool segment decides the route; the alias segment is not checked
    /// against the endpoint that ends up serving the call.
    pub async fn call_tool(
        &self,
        identifier: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallResult> {
        let tool = identifier
            .split(IDENTIFIER_DELIMITER)
            .nth(1)
            .ok_or_else(|| {
                OrchestratorError::routing(
                    identifier,
                    format!("expected '<alias>{}<tool>'", IDENTIFIER_DELIMITER),
                )
            })?;

        let endpoint = self.routes.resolve(tool).ok_or_else(|| {
            OrchestratorError::routing(identifier, format!("no endpoint provides tool '{}'", tool))
        })?;

        let record = self.registry.get(endpoint).ok_or_else(|| {
            OrchestratorError::routing(
                identifier,
                format!("endpoint '{}' for tool '{}' is no longer registered", endpoint, tool),
            )
        })?;

        debug!(identifier, tool, endpoint, "Dispatching tool call");

        let operation = format!("call tool '{}' on endpoint '{}'", tool, endpoint);
        self.deadline
            .run(&operation, record.session.call_tool(tool, arguments))
            .await
            .map_err(|e| {
                if e.is_deadline() {
                    e
                } else {
                    OrchestratorError::Transport {
                        tool: tool.to_string(),
                        endpoint: endpoint.to_string(),
                        message: e.to_string(),
                    }
                }
            })
    }

    /// Close every endpoint concurrently; failures are reported, never raised
    pub async fn close(&mut self) -> CloseReport {
        self.routes.clear();
        let deadline = self.deadline.clone();
        let outcomes = join_all(self.registry.drain().into_iter().map(|mut record| {
            let deadline = deadline.clone();
            async move {
                let operation = format!("close endpoint '{}'", record.name);
                let outcome = deadline.run(&operation, record.session.close()).await;
                (record.name, outcome)
            }
        }))
        .await;

        let mut report = CloseReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => report.closed.push(name),
                Err(e) => {
                    warn!(endpoint = %name, error = %e, "Failed to close endpoint");
                    report.failures.push((name, e));
                }
            }
        }
        report
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn init_summary(&self, endpoint: &str) -> Option<&InitSummary> {
        self.registry.get(endpoint).and_then(|r| r.init.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify;
    use crate::report::{self, ContentBlock};
    use crate::session::mock::{FailAt, MockSession};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn orchestrator(sessions: Vec<(&str, MockSession)>) -> Orchestrator {
        let (sink, _stream) = notify::channel(notify::DEFAULT_CAPACITY);
        orchestrator_with(sessions, Deadline::after(Duration::from_secs(5)), &sink)
    }

    fn orchestrator_with(
        sessions: Vec<(&str, MockSession)>,
        deadline: Deadline,
        sink: &NotificationSink,
    ) -> Orchestrator {
        let sessions = sessions
            .into_iter()
            .map(|(name, session)| (name.to_string(), session.boxed()))
            .collect();
        Orchestrator::with_sessions(sessions, ClientIdentity::default(), deadline, sink)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_all_drops_exactly_the_failures() {
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default")),
            ("broken", MockSession::new("broken").failing_at(FailAt::Start)),
            ("k8s", MockSession::new("k8s")),
        ]);

        let dropped = orch.start_all().await.unwrap();

        assert_eq!(orch.endpoint_names(), vec!["default", "k8s"]);
        assert_eq!(dropped.len(), 1);
        assert!(matches!(&dropped[0], OrchestratorError::Start { endpoint, .. } if endpoint == "broken"));
        assert!(logs_contain("Dropping endpoint"));
        assert!(logs_contain("broken"));
    }

    #[tokio::test]
    async fn test_start_all_with_every_failure_is_fatal() {
        let mut orch = orchestrator(vec![
            ("a", MockSession::new("a").failing_at(FailAt::Start)),
            ("b", MockSession::new("b").failing_at(FailAt::Start)),
        ]);

        let result = orch.start_all().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::NoServersRunning { stage: "start" })
        ));
        assert!(orch.endpoint_names().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_all_drops_handshake_failures_and_keeps_metadata() {
        let broken = MockSession::new("broken").failing_at(FailAt::Initialize);
        let broken_recorder = broken.recorder();
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("Docker Server")),
            ("broken", broken),
        ]);

        orch.start_all().await.unwrap();
        let dropped = orch.initialize_all().await.unwrap();

        assert_eq!(orch.endpoint_names(), vec!["default"]);
        assert!(matches!(&dropped[0], OrchestratorError::Handshake { endpoint, .. } if endpoint == "broken"));
        assert_eq!(
            orch.init_summary("default").unwrap().server_name,
            "Docker Server"
        );
        // Dropped sessions are closed, not leaked.
        assert!(broken_recorder.was_closed());
    }

    #[tokio::test]
    async fn test_initialize_all_with_every_failure_is_fatal() {
        let mut orch = orchestrator(vec![(
            "only",
            MockSession::new("only").failing_at(FailAt::Initialize),
        )]);

        orch.start_all().await.unwrap();
        let result = orch.initialize_all().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::NoServersRunning { stage: "initialize" })
        ));
    }

    #[tokio::test]
    async fn test_discovery_builds_routes_for_every_tool() {
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default").with_tool("pull_image").with_tool("git_init")),
            ("k8s", MockSession::new("k8s").with_tool("get_pods")),
        ]);

        orch.bring_up().await.unwrap();

        assert_eq!(orch.routes().resolve("pull_image"), Some("default"));
        assert_eq!(orch.routes().resolve("git_init"), Some("default"));
        assert_eq!(orch.routes().resolve("get_pods"), Some("k8s"));
        for tool in orch.routes().tool_names() {
            let owner = orch.routes().resolve(&tool).unwrap();
            assert!(orch.registry().contains(owner));
        }
    }

    #[tokio::test]
    async fn test_duplicate_tool_routes_to_last_processed_endpoint() {
        let mut orch = orchestrator(vec![
            ("first", MockSession::new("first").with_tool("shared")),
            ("second", MockSession::new("second").with_tool("shared")),
        ]);

        orch.bring_up().await.unwrap();
        assert_eq!(orch.routes().resolve("shared"), Some("second"));
    }

    #[tokio::test]
    async fn test_dropped_endpoint_never_appears_in_routes() {
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default").with_tool("pull_image")),
            (
                "broken",
                MockSession::new("broken")
                    .with_tool("get_pods")
                    .failing_at(FailAt::Start),
            ),
        ]);

        orch.bring_up().await.unwrap();
        assert_eq!(orch.routes().resolve("get_pods"), None);
        assert_eq!(orch.routes().len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default").with_tool("pull_image")),
            ("k8s", MockSession::new("k8s").failing_at(FailAt::ListTools)),
        ]);

        let result = orch.bring_up().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Discovery { endpoint, .. }) if endpoint == "k8s"
        ));
        // Nothing was dropped: discovery failures are surfaced, not absorbed.
        assert_eq!(orch.endpoint_names(), vec!["default", "k8s"]);
        assert!(orch.routes().is_empty());
    }

    #[tokio::test]
    async fn test_tools_as_json_groups_by_endpoint() {
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default").with_tool("pull_image")),
            ("k8s", MockSession::new("k8s").with_tool("get_pods")),
        ]);
        orch.bring_up().await.unwrap();

        let json = orch.tools_as_json().unwrap();
        assert_eq!(json["default"][0]["name"], "pull_image");
        assert_eq!(json["k8s"][0]["name"], "get_pods");
        assert_eq!(json["k8s"][0]["inputSchema"], json!({"type": "object"}));
    }

    #[tokio::test]
    async fn test_call_tool_unknown_tool_is_routing_error_for_any_alias() {
        let mut orch = orchestrator(vec![(
            "default",
            MockSession::new("default").with_tool("pull_image"),
        )]);
        orch.bring_up().await.unwrap();

        for identifier in ["default.toolX", "nonexistent.toolX"] {
            let result = orch.call_tool(identifier, Map::new()).await;
            assert!(matches!(
                result,
                Err(OrchestratorError::Routing { identifier: id, .. }) if id == identifier
            ));
        }
    }

    #[tokio::test]
    async fn test_call_tool_without_delimiter_is_routing_error() {
        let default = MockSession::new("default").with_tool("pull_image");
        let recorder = default.recorder();
        let mut orch = orchestrator(vec![("default", default)]);
        orch.bring_up().await.unwrap();

        let result = orch.call_tool("pull_image", Map::new()).await;
        assert!(matches!(result, Err(OrchestratorError::Routing { .. })));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_ignores_alias_segment() {
        let k8s = MockSession::new("k8s").with_tool("get_pods");
        let recorder = k8s.recorder();
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default").with_tool("pull_image")),
            ("k8s", k8s),
        ]);
        orch.bring_up().await.unwrap();

        orch.call_tool("default.get_pods", Map::new()).await.unwrap();
        assert_eq!(recorder.calls()[0].0, "get_pods");
    }

    #[tokio::test]
    async fn test_call_tool_transport_failure_names_tool_and_endpoint() {
        let mut orch = orchestrator(vec![(
            "default",
            MockSession::new("default")
                .with_tool("pull_image")
                .failing_at(FailAt::CallTool),
        )]);
        orch.bring_up().await.unwrap();

        let result = orch.call_tool("default.pull_image", Map::new()).await;
        match result {
            Err(OrchestratorError::Transport { tool, endpoint, .. }) => {
                assert_eq!(tool, "pull_image");
                assert_eq!(endpoint, "default");
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_hits_shared_deadline() {
        let (sink, _stream) = notify::channel(notify::DEFAULT_CAPACITY);
        let mut orch = orchestrator_with(
            vec![(
                "default",
                MockSession::new("default")
                    .with_tool("pull_image")
                    .hanging_at(FailAt::CallTool),
            )],
            Deadline::after(Duration::from_secs(90)),
            &sink,
        );
        orch.bring_up().await.unwrap();

        let result = orch.call_tool("default.pull_image", Map::new()).await;
        assert!(matches!(result, Err(OrchestratorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_hanging_start_is_dropped_when_cancelled() {
        let (sink, _stream) = notify::channel(notify::DEFAULT_CAPACITY);
        let deadline = Deadline::after(Duration::from_secs(60));
        let mut orch = orchestrator_with(
            vec![
                ("slow", MockSession::new("slow").hanging_at(FailAt::Start)),
                ("fast", MockSession::new("fast")),
            ],
            deadline.clone(),
            &sink,
        );

        let canceller = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        // "fast" finished before the cancel, so it survives.
        let dropped = orch.start_all().await.unwrap();
        assert_eq!(orch.endpoint_names(), vec!["fast"]);
        assert!(matches!(&dropped[0], OrchestratorError::Start { endpoint, .. } if endpoint == "slow"));
    }

    #[tokio::test]
    async fn test_close_continues_past_failures() {
        let a = MockSession::new("a");
        let b = MockSession::new("b").failing_at(FailAt::Close);
        let c = MockSession::new("c");
        let (recorder_a, recorder_c) = (a.recorder(), c.recorder());
        let mut orch = orchestrator(vec![("a", a), ("b", b), ("c", c)]);
        orch.bring_up().await.unwrap();

        let report = orch.close().await;

        assert!(!report.is_clean());
        assert_eq!(report.closed, vec!["a", "c"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "b");
        assert!(recorder_a.was_closed());
        assert!(recorder_c.was_closed());
        assert!(orch.endpoint_names().is_empty());
        assert!(orch.routes().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_are_tagged_with_endpoint() {
        let (sink, mut stream) = notify::channel(notify::DEFAULT_CAPACITY);
        let mut orch = orchestrator_with(
            vec![("default", MockSession::new("default"))],
            Deadline::after(Duration::from_secs(5)),
            &sink,
        );

        orch.start_all().await.unwrap();
        orch.initialize_all().await.unwrap();

        let notification = stream.recv().await.unwrap();
        assert_eq!(notification.endpoint, "default");
        assert_eq!(notification.payload["name"], "initialized");
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_after_discovery() {
        let mut orch = orchestrator(vec![
            ("default", MockSession::new("default").with_tool("pull_image")),
            ("k8s", MockSession::new("k8s").with_tool("get_pods")),
        ]);
        orch.bring_up().await.unwrap();
        let orch = Arc::new(orch);

        let handles: Vec<_> = ["default.pull_image", "k8s.get_pods", "x.pull_image"]
            .into_iter()
            .map(|identifier| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move { orch.call_tool(identifier, Map::new()).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_end_to_end_two_endpoints() {
        let docker = MockSession::new("Docker Server")
            .with_tool("pull_image")
            .with_response(
                "pull_image",
                CallResult {
                    is_error: false,
                    content: vec![ContentBlock::Text {
                        text: "Image 'redis:latest' pulled successfully".to_string(),
                    }],
                },
            );
        let docker_recorder = docker.recorder();
        let k8s = MockSession::new("K8s Server").with_tool("get_pods");
        let k8s_recorder = k8s.recorder();

        let mut orch = orchestrator(vec![("default", docker), ("k8s", k8s)]);
        orch.bring_up().await.unwrap();

        let arguments = args(json!({"image": "redis:latest"}));
        let result = orch
            .call_tool("default.pull_image", arguments.clone())
            .await
            .unwrap();

        assert_eq!(docker_recorder.calls(), vec![("pull_image".to_string(), arguments)]);
        assert!(k8s_recorder.calls().is_empty());

        let rendered = report::render("pull_image", &result);
        assert!(rendered.starts_with("Tool: pull_image | IsError: false\n"));
        assert!(rendered.contains("    Image 'redis:latest' pulled successfully"));

        assert!(orch.close().await.is_clean());
    }
}
