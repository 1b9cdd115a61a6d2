//! Endpoint registry and tool routing table

use crate::session::{InitSummary, Session};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Information about an MCP tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Tool name as the endpoint knows it
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: String,
    /// Input schema for parameters (JSON Schema), kept opaque
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl ToolInfo {
    pub fn new<N: Into<String>, D: Into<String>>(name: N, description: D) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    /// Convert a tool from a `tools/list` response
    pub fn from_rmcp(rmcp_tool: rmcp::model::Tool) -> Self {
        Self {
            name: rmcp_tool.name.to_string(),
            description: rmcp_tool
                .description
                .map(|d| d.to_string())
                .unwrap_or_default(),
            input_schema: serde_json::Value::Object((*rmcp_tool.input_schema).clone()),
        }
    }
}

/// Everything known about one surviving endpoint
pub struct EndpointRecord {
    pub name: String,
    pub session: Box<dyn Session>,
    pub tools: Vec<ToolInfo>,
    pub init: Option<InitSummary>,
}

impl EndpointRecord {
    pub fn new(name: String, session: Box<dyn Session>) -> Self {
        Self {
            name,
            session,
            tools: Vec::new(),
            init: None,
        }
    }
}

/// Surviving endpoints, in configuration order
///
/// Endpoints are only ever removed, never disabled in place.
#[derive(Default)]
pub struct EndpointRegistry {
    records: Vec<EndpointRecord>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, replacing any earlier record with the same name
    pub fn insert(&mut self, record: EndpointRecord) {
        match self.records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EndpointRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every record, preserving order, for a fan-out stage
    pub fn drain(&mut self) -> Vec<EndpointRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EndpointRecord> {
        self.records.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tool catalogs keyed by endpoint name
    pub fn catalogs(&self) -> BTreeMap<&str, &[ToolInfo]> {
        self.records
            .iter()
            .map(|r| (r.name.as_str(), r.tools.as_slice()))
            .collect()
    }
}

/// Tool name → owning endpoint name
///
/// Later insertions win when two endpoints expose the same tool name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTable {
    routes: HashMap<String, String>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from every catalog in registry order
    pub fn from_registry(registry: &EndpointRegistry) -> Self {
        let mut table = Self::new();
        for record in registry.iter() {
            for tool in &record.tools {
                if let Some(previous) = table.insert(&tool.name, &record.name) {
                    if previous != record.name {
                        warn!(
                            tool = %tool.name,
                            previous = %previous,
                            endpoint = %record.name,
                            "Tool exposed by several endpoints; routing to the last one"
                        );
                    }
                }
            }
        }
        table
    }

    /// Route `tool` to `endpoint`, returning the previous owner
    pub fn insert(&mut self, tool: &str, endpoint: &str) -> Option<String> {
        self.routes.insert(tool.to_string(), endpoint.to_string())
    }

    pub fn resolve(&self, tool: &str) -> Option<&str> {
        self.routes.get(tool).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Sorted tool names
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }
}
