//! CLI interface for qmd.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::graph::{DEFAULT_RELATED_LIMIT, DEFAULT_RELATION_TYPE};
use crate::search::DEFAULT_SEARCH_LIMIT;
use crate::storage::DEFAULT_TIMELINE_LIMIT;

/// Command-line interface for qmd.
#[derive(Parser)]
#[command(name = "qmd")]
#[command(author, version, about = "Embedded note store with search", long_about = None)]
pub struct Cli {
    /// Store file to use instead of the configured one.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Add an entry, replacing any entry with the same id.
    Add {
        /// Entry id.
        id: String,

        /// Entry content. Read from --file or stdin when omitted.
        content: Option<String>,

        /// Read content from file instead of stdin.
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,

        /// Metadata as key=value. Repeatable.
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Print one entry.
    Get {
        /// Entry id.
        id: String,
    },

    /// Delete an entry with its tags and relations.
    Delete {
        /// Entry id.
        id: String,
    },

    /// Full-text search over entries.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        /// Re-rank results by fingerprint similarity.
        #[arg(short, long)]
        semantic: bool,
    },

    /// List entries newest first.
    Timeline {
        /// Earliest creation time (unix seconds, YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        from: Option<String>,

        /// Latest creation time (unix seconds, YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of entries to return.
        #[arg(short, long, default_value_t = DEFAULT_TIMELINE_LIMIT)]
        limit: usize,
    },

    /// Attach a tag to an entry.
    Tag {
        /// Entry id.
        id: String,

        /// Tag name.
        name: String,

        /// Color for a newly created tag.
        #[arg(short, long)]
        color: Option<String>,
    },

    /// List all tags, or the entries carrying one tag.
    Tags {
        /// Show entries with this tag.
        name: Option<String>,

        /// Maximum number of entries to return.
        #[arg(short, long, default_value_t = DEFAULT_TIMELINE_LIMIT)]
        limit: usize,
    },

    /// Record a directed relation between two entries.
    Relate {
        /// Source entry id.
        source: String,

        /// Target entry id.
        target: String,

        /// Relation type.
        #[arg(short = 't', long = "type", default_value = DEFAULT_RELATION_TYPE)]
        relation_type: String,
    },

    /// List the targets of an entry's relations.
    Related {
        /// Entry id.
        id: String,

        /// Only follow relations of this type.
        #[arg(short = 't', long = "type")]
        relation_type: Option<String>,

        /// Maximum number of entries to return.
        #[arg(short, long, default_value_t = DEFAULT_RELATED_LIMIT)]
        limit: usize,
    },

    /// Print an entry with its related entries and tags.
    Context {
        /// Entry id.
        id: String,
    },

    /// Import text files from a directory as entries.
    Bootstrap {
        /// Directory to import. Defaults to the configured one.
        dir: Option<String>,
    },

    /// Remove entries with duplicate content.
    Dedupe,

    /// Rebuild the search index and cached fingerprints.
    Reindex,

    /// Print every entry as JSON.
    Export,

    /// Start the HTTP server.
    Serve {
        /// Address to bind. Defaults to the configured host.
        #[arg(long)]
        host: Option<String>,

        /// Port to bind. Defaults to the configured port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Start the MCP server for AI editor integration.
    #[cfg(feature = "mcp")]
    Mcp,
}
