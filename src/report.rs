//! Tool call results and their rendering into a plain-text report

use crate::error::Result;
use rmcp::model::{CallToolResult, Content, RawContent};
use serde_json::Value;
use std::fmt::Write;

/// Prefix applied to every line of a block's body
pub const BODY_INDENT: &str = "    ";

/// One unit of a tool's response payload
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Binary payload; only the length of its base64 encoding is kept
    Image {
        mime_type: String,
        binary_length: usize,
    },
    /// Any content kind this client does not interpret
    Unknown {
        kind: String,
        raw: Value,
    },
}

impl ContentBlock {
    /// Classify one rmcp content block
    ///
    /// Kinds without a dedicated rendering keep their JSON form for the report.
    pub fn from_rmcp(content: &Content) -> Result<Self> {
        let block = match &content.raw {
            RawContent::Text(text) => Self::Text {
                text: text.text.clone(),
            },
            RawContent::Image(image) => Self::Image {
                mime_type: image.mime_type.clone(),
                binary_length: image.data.len(),
            },
            RawContent::Resource(_) => Self::unknown("resource", content)?,
            RawContent::Audio(_) => Self::unknown("audio", content)?,
            RawContent::ResourceLink(_) => Self::unknown("resource_link", content)?,
        };
        Ok(block)
    }

    fn unknown(kind: &str, content: &Content) -> Result<Self> {
        Ok(Self::Unknown {
            kind: kind.to_string(),
            raw: serde_json::to_value(content)?,
        })
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallResult {
    pub is_error: bool,
    pub content: Vec<ContentBlock>,
}

impl CallResult {
    pub fn from_rmcp(result: &CallToolResult) -> Result<Self> {
        let content = result
            .content
            .iter()
            .map(ContentBlock::from_rmcp)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            is_error: result.is_error.unwrap_or(false),
            content,
        })
    }
}

/// Render `result` as the multi-line report printed for one call of `tool`
pub fn render(tool: &str, result: &CallResult) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Tool: {} | IsError: {}", tool, result.is_error);

    if result.content.is_empty() {
        let _ = writeln!(out, "No content returned.");
        return out;
    }

    for (index, block) in result.content.iter().enumerate() {
        let _ = writeln!(out, "Content[{}]: {:?}", index + 1, block);
        match block {
            ContentBlock::Text { text } => {
                for line in text.lines() {
                    let _ = writeln!(out, "{}{}", BODY_INDENT, line);
                }
            }
            ContentBlock::Image {
                mime_type,
                binary_length,
            } => {
                let _ = writeln!(
                    out,
                    "{}Image: mime type {}, {} bytes of encoded data",
                    BODY_INDENT, mime_type, binary_length
                );
            }
            ContentBlock::Unknown { kind, raw } => {
                let _ = writeln!(out, "{}Unrecognized content type '{}':", BODY_INDENT, kind);
                for line in format!("{:#}", raw).lines() {
                    let _ = writeln!(out, "{}{}{}", BODY_INDENT, BODY_INDENT, line);
                }
            }
        }
    }

    out
}
