//! qmd - an embedded note store with search.
//!
//! Entries live in a single SQLite file together with a full-text index,
//! tags, typed relations and cached fingerprints. The same operations are
//! exposed through a CLI, an HTTP API and, optionally, an MCP server.
//!
//! # Modules
//!
//! - [`commands`] - The [`commands::Qmd`] handle shared by every gateway
//! - [`storage`] - Entry persistence, timelines and deduplication
//! - [`search`] - Query parsing and the full-text index
//! - [`graph`] - Tags, relations and context
//! - [`rank`] - Re-ranking strategies and fingerprints
//! - [`entry`] - Entry, tag and metadata types
//! - [`server`] - HTTP API
//! - [`config`] - Configuration loading
//! - [`cli`] - Command-line interface definitions

pub mod cli;
pub mod commands;
pub mod config;
pub mod entry;
pub mod error;
pub mod graph;
pub mod rank;
pub mod search;
pub mod server;
pub mod storage;

#[cfg(feature = "mcp")]
pub mod mcp;

pub use commands::Qmd;
pub use error::{QmdError, Result};
