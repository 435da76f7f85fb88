//! MCP server implementation for qmd.
//!
//! Exposes the note store as MCP tools for AI editors.

use std::borrow::Cow;
use std::fmt::Write;

use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, ErrorData as McpError, ServerCapabilities, ServerInfo,
    },
    schemars, tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::Deserialize;

use crate::commands::{Qmd, parse_meta_pair};
use crate::entry::Metadata;
use crate::error::QmdError;
use crate::search::{DEFAULT_SEARCH_LIMIT, SearchOptions};

/// Parameters for `search_memory` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "The search query")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default: 10)")]
    pub limit: Option<usize>,
    #[schemars(description = "Re-rank by similarity to the query (default: false)")]
    pub semantic: Option<bool>,
}

/// Parameters for `get_entry` and `memory_context` tools.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EntryParams {
    #[schemars(description = "Entry id")]
    pub id: String,
}

/// Parameters for `add_entry` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AddParams {
    #[schemars(description = "Entry id; an existing entry with this id is replaced")]
    pub id: String,
    #[schemars(description = "Entry content")]
    pub content: String,
    #[schemars(description = "Metadata as key=value pairs")]
    pub metadata: Option<Vec<String>>,
    #[schemars(description = "Tags to attach")]
    pub tags: Option<Vec<String>>,
}

fn tool_error(action: &str, e: &QmdError) -> McpError {
    let code = match e {
        QmdError::InvalidArgument(_) | QmdError::NotFound(_) => ErrorCode::INVALID_PARAMS,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    McpError {
        code,
        message: Cow::from(format!("{action} failed: {e}")),
        data: None,
    }
}

/// MCP server exposing qmd tools.
#[derive(Clone)]
pub struct QmdServer {
    qmd: Qmd,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl QmdServer {
    #[must_use]
    pub fn new(qmd: Qmd) -> Self {
        Self {
            qmd,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Full-text search over stored notes")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let options = SearchOptions {
            limit: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            semantic: params.semantic.unwrap_or(false),
        };

        let hits = self
            .qmd
            .search(&params.query, options)
            .map_err(|e| tool_error("Search", &e))?;

        if hits.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "No matches found for '{}'",
                params.query
            ))]));
        }

        let mut output = String::new();
        for hit in &hits {
            let _ = write!(
                output,
                "## {}\n**Score:** {:.3}\n{}\n\n",
                hit.entry.id, hit.score, hit.entry.content
            );
        }
        let _ = write!(output, "*{} result(s) found*", hits.len());

        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(description = "Get one note by id")]
    async fn get_entry(
        &self,
        Parameters(params): Parameters<EntryParams>,
    ) -> Result<CallToolResult, McpError> {
        let entry = self
            .qmd
            .get(&params.id)
            .map_err(|e| tool_error("Get", &e))?;
        Ok(CallToolResult::success(vec![Content::text(entry.content)]))
    }

    #[tool(description = "Add a note, replacing any note with the same id")]
    async fn add_entry(
        &self,
        Parameters(params): Parameters<AddParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut metadata = Metadata::new();
        for pair in params.metadata.unwrap_or_default() {
            let (key, value) = parse_meta_pair(&pair).map_err(|e| tool_error("Add", &e))?;
            metadata.insert(key, value);
        }

        let entry = self
            .qmd
            .add(&params.id, &params.content, &metadata)
            .map_err(|e| tool_error("Add", &e))?;

        for tag in params.tags.unwrap_or_default() {
            self.qmd
                .tag(&entry.id, &tag, None)
                .map_err(|e| tool_error("Tag", &e))?;
        }

        Ok(CallToolResult::success(vec![Content::text(format!(
            "Stored entry '{}'",
            entry.id
        ))]))
    }

    #[tool(description = "Get a note with its related notes and tags")]
    async fn memory_context(
        &self,
        Parameters(params): Parameters<EntryParams>,
    ) -> Result<CallToolResult, McpError> {
        let context = self
            .qmd
            .context(&params.id)
            .map_err(|e| tool_error("Context", &e))?;

        let mut output = format!("## {}\n{}\n", context.entry.id, context.entry.content);
        if !context.tags.is_empty() {
            let names: Vec<&str> = context.tags.iter().map(|t| t.name.as_str()).collect();
            let _ = write!(output, "\n**Tags:** {}\n", names.join(", "));
        }
        if !context.related.is_empty() {
            output.push_str("\n**Related:**\n");
            for related in &context.related {
                let _ = writeln!(output, "- {}", related.id);
            }
        }

        Ok(CallToolResult::success(vec![Content::text(output)]))
    }
}

#[tool_handler]
impl ServerHandler for QmdServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "qmd is a local note store. Use search_memory to find notes, \
                get_entry to read one, memory_context to follow its tags and relations, \
                and add_entry to save new notes."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Start the MCP server with stdio transport.
///
/// # Errors
///
/// Returns an error if the server fails to start or encounters a fatal error.
pub async fn serve(qmd: Qmd) -> anyhow::Result<()> {
    let server = QmdServer::new(qmd);
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
