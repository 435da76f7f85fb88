use std::io::Read;

use clap::{CommandFactory, Parser};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use qmd::cli::{Cli, Commands};
use qmd::commands::{Qmd, parse_meta_pair, parse_time_range};
use qmd::config::{self, Config};
use qmd::entry::{Entry, Metadata, ScoredEntry, Tag};
use qmd::search::SearchOptions;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = Config::load()?;
    let workspace = config::workspace();
    let app = Qmd::open(&config, &workspace, cli.db.as_deref())?;
    let json = cli.json;

    match command {
        Commands::Add {
            id,
            content,
            file,
            meta,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };

            let mut metadata = Metadata::new();
            for pair in &meta {
                let (key, value) = parse_meta_pair(pair)?;
                metadata.insert(key, value);
            }

            let entry = app.add(&id, &content, &metadata)?;
            if json {
                print_json(&entry)?;
            } else {
                println!("Stored entry: {}", entry.id);
            }
        }
        Commands::Get { id } => {
            let entry = app.get(&id)?;
            if json {
                print_json(&entry)?;
            } else {
                print_entry(&entry);
            }
        }
        Commands::Delete { id } => {
            let deleted = app.delete(&id)?;
            if json {
                print_json(&serde_json::json!({ "deleted": deleted }))?;
            } else if deleted {
                println!("Deleted entry: {id}");
            } else {
                println!("No entry with id '{id}'");
            }
        }
        Commands::Search {
            query,
            limit,
            semantic,
        } => {
            let hits = app.search(&query, SearchOptions { limit, semantic })?;
            if json {
                print_json(&hits)?;
            } else {
                print_hits(&query, &hits);
            }
        }
        Commands::Timeline { from, to, limit } => {
            let range = parse_time_range(from.as_deref(), to.as_deref())?;
            let entries = app.timeline(range, limit)?;
            if json {
                print_json(&entries)?;
            } else {
                print_entry_list(&entries);
            }
        }
        Commands::Tag { id, name, color } => {
            let tag = app.tag(&id, &name, color.as_deref())?;
            if json {
                print_json(&tag)?;
            } else {
                println!("Tagged {id} with {}", tag.name);
            }
        }
        Commands::Tags { name, limit } => match name {
            Some(name) => {
                let entries = app.graph().entries_by_tag(&name, limit)?;
                if json {
                    print_json(&entries)?;
                } else {
                    print_entry_list(&entries);
                }
            }
            None => {
                let tags = app.graph().list_tags()?;
                if json {
                    print_json(&tags)?;
                } else {
                    print_tags(&tags);
                }
            }
        },
        Commands::Relate {
            source,
            target,
            relation_type,
        } => {
            app.relate(&source, &target, &relation_type)?;
            if json {
                print_json(&serde_json::json!({ "success": true }))?;
            } else {
                println!("Related {source} -[{relation_type}]-> {target}");
            }
        }
        Commands::Related {
            id,
            relation_type,
            limit,
        } => {
            let entries = app
                .graph()
                .related_to(&id, relation_type.as_deref(), limit)?;
            if json {
                print_json(&entries)?;
            } else {
                print_entry_list(&entries);
            }
        }
        Commands::Context { id } => {
            let context = app.context(&id)?;
            if json {
                print_json(&context)?;
            } else {
                print_entry(&context.entry);
                if !context.tags.is_empty() {
                    println!();
                    print_tags(&context.tags);
                }
                if !context.related.is_empty() {
                    println!("\nRelated:");
                    print_entry_list(&context.related);
                }
            }
        }
        Commands::Bootstrap { dir } => {
            let report = app.bootstrap(dir.as_deref())?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Imported {} file(s), skipped {}",
                    report.imported, report.skipped
                );
            }
        }
        Commands::Dedupe => {
            let report = app.dedupe()?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Removed {} duplicate(s) across {} group(s)",
                    report.removed, report.groups
                );
            }
        }
        Commands::Reindex => {
            let report = app.reindex()?;
            if json {
                print_json(&report)?;
            } else {
                println!("Reindexed {} entries, embedded {}", report.total, report.embedded);
            }
        }
        Commands::Export => print_json(&app.export()?)?,
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            tokio::runtime::Runtime::new()?.block_on(qmd::server::serve(app, &host, port))?;
        }
        #[cfg(feature = "mcp")]
        Commands::Mcp => tokio::runtime::Runtime::new()?.block_on(qmd::mcp::serve(app))?,
    }

    Ok(())
}

/// Log to stderr so stdout stays clean for command output and MCP stdio.
fn init_tracing(verbose: bool) {
    let default = if verbose { "qmd=debug" } else { "qmd=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_entry(entry: &Entry) {
    println!("{}", entry.id);
    if !entry.metadata.is_empty() {
        let pairs: Vec<String> = entry
            .metadata
            .iter()
            .map(|(key, value)| format!("{key}={}", serde_json::to_string(value).unwrap_or_default()))
            .collect();
        println!("{}", pairs.join(" "));
    }
    println!("\n{}", entry.content);
}

fn print_entry_list(entries: &[Entry]) {
    if entries.is_empty() {
        println!("No entries found.");
        return;
    }
    for entry in entries {
        println!("- {}: {}", entry.id, preview(&entry.content));
    }
}

fn print_hits(query: &str, hits: &[ScoredEntry]) {
    if hits.is_empty() {
        println!("No matches found for '{query}'");
        return;
    }
    for hit in hits {
        println!("[{:.3}] {}: {}", hit.score, hit.entry.id, preview(&hit.entry.content));
    }
    println!("\n{} result(s) found", hits.len());
}

fn print_tags(tags: &[Tag]) {
    if tags.is_empty() {
        println!("No tags found.");
        return;
    }
    for tag in tags {
        match &tag.color {
            Some(color) => println!("- {} ({color})", tag.name),
            None => println!("- {}", tag.name),
        }
    }
}

/// First line of `content`, shortened to 80 characters.
fn preview(content: &str) -> String {
    let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() > 80 {
        let cut: String = line.chars().take(77).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
