// ABOUTME: Command-line interface definitions using clap
// ABOUTME: Defines all subcommands and global flags

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::sync::Selector;

#[derive(Parser, Debug)]
#[command(name = "orgfoundry")]
#[command(
    about = "Sync a FoundryVTT journal with a directory of Org files",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Relay base URL (overrides config file)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Relay token (overrides env and config file)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Local sync root (overrides config file)
    #[arg(long, global = true)]
    pub root_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Disable throttling (not recommended)
    #[arg(long, global = true)]
    pub no_throttle: bool,

    /// Throttle range in ms (min:max)
    #[arg(long, global = true, value_parser = parse_throttle_range)]
    pub throttle_ms: Option<(u64, u64)>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_throttle_range(s: &str) -> Result<(u64, u64), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected format: min:max".into());
    }

    let min = parts[0].parse().map_err(|_| "Invalid min value")?;
    let max = parts[1].parse().map_err(|_| "Invalid max value")?;

    if min > max {
        return Err("min must be <= max".into());
    }

    Ok((min, max))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Download the whole journal into the sync root (default)
    Download,

    /// Download one document or folder with its subtree
    #[command(alias = "download-one")]
    Fetch {
        /// Remote id of the document or folder
        #[arg(required_unless_present = "name", conflicts_with = "name")]
        id: Option<String>,

        /// Display name instead of id; must be unique in the journal
        #[arg(long)]
        name: Option<String>,
    },

    /// Upload one local Org file
    Upload {
        /// Path to a .org file under the sync root
        path: PathBuf,
    },

    /// Upload every untracked or locally modified Org file
    UploadAll,

    /// Show the sync state of every local Org file
    Status,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Download)
    }
}

impl Commands {
    /// Selector for `fetch`, if this is one.
    pub fn selector(&self) -> Option<Selector> {
        match self {
            Commands::Fetch { name: Some(name), .. } => Some(Selector::Name(name.clone())),
            Commands::Fetch { id: Some(id), .. } => Some(Selector::Id(id.as_str().into())),
            _ => None,
        }
    }
}
