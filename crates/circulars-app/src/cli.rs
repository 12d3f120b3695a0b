//! CLI argument definitions for the circulars front end.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Browse regulatory circulars and chat with each one.
#[derive(Parser, Debug)]
#[command(name = "circulars", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding the config file.
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open a circular and print it with its references and chat history.
    Show {
        /// Circular identifier.
        id: String,
    },
    /// Ask one or more questions about a circular, all at once.
    Ask {
        id: String,
        /// Questions to submit concurrently.
        #[arg(required = true)]
        questions: Vec<String>,
    },
    /// Toggle a circular's bookmark.
    Bookmark { id: String },
    /// List the catalog.
    List {
        /// Only bookmarked circulars.
        #[arg(long, conflicts_with_all = ["year", "month"])]
        bookmarked: bool,
        /// Publication year; requires --month.
        #[arg(long, requires = "month")]
        year: Option<i32>,
        /// Publication month (1-12); requires --year.
        #[arg(long, requires = "year")]
        month: Option<u32>,
        /// Case-insensitive title search.
        #[arg(long)]
        search: Option<String>,
        /// Keep circulars carrying any of these tags.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CIRCULARS_CONFIG env var > ~/.circulars/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CIRCULARS_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".circulars").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".circulars").join("config.toml");
    }
    PathBuf::from("config.toml")
}
