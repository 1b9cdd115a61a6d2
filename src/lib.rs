//! mcproute: route tool calls across a fleet of MCP servers
//!
//! Connects to several independent MCP tool servers (over SSE or a spawned
//! subprocess), discovers the tools each one exposes, and routes a single
//! `"<alias>.<tool>"` invocation to the server that owns the tool. Servers
//! that cannot be started or fail the handshake are dropped; the fleet keeps
//! working as long as one server survives.
#![deny(unsafe_code)]

pub mod config;
pub mod deadline;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod session;

pub use config::{EndpointConfig, OrchestratorConfig, TransportConfig};
pub use deadline::Deadline;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{CloseReport, Orchestrator};
pub use registry::{ToolInfo, RoutingTable};
pub use report::{CallResult, ContentBlock};
pub use session::{ClientIdentity, InitSummary, McpSession, Session, SessionState};
