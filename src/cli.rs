use clap::{Args, Parser, Subcommand};

use crate::commands;
use nodemark::Result;

/// nodemark - durable CSS selectors for live DOM nodes over CDP
#[derive(Parser)]
#[command(name = "nodemark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// CDP port, http:// URL or WebSocket URL (overrides the profile)
    #[arg(long, env = "NODEMARK_CDP", global = true)]
    pub cdp: Option<String>,

    /// Profile name to use
    #[arg(short = 'P', long, env = "NODEMARK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Per-operation timeout in milliseconds (overrides config)
    #[arg(long, value_name = "MS", global = true)]
    pub timeout: Option<u64>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List open tabs
    Tabs,

    /// Print the accessibility tree of a tab
    Tree {
        /// Tab (target) id
        tab: String,

        /// Include non-interactive nodes
        #[arg(long)]
        all: bool,
    },

    /// Turn backend node ids into CSS selectors
    Resolve {
        /// Tab (target) id
        tab: String,

        /// Backend node ids from the accessibility tree
        #[arg(required = true)]
        backend_node_ids: Vec<i64>,
    },

    /// Click an element
    Click {
        /// Tab (target) id
        tab: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Fill a form field
    Fill {
        /// Tab (target) id
        tab: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Text to put into the field
        text: String,
    },

    /// Evaluate JavaScript in the page
    Eval {
        /// Tab (target) id
        tab: String,

        /// Script source
        script: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Element to act on: a backend node id to resolve first, or a selector.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Backend node id (resolved to a selector first)
    #[arg(long)]
    pub node: Option<i64>,

    /// CSS selector
    #[arg(long)]
    pub selector: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (e.g., session.operation_timeout_ms)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Value to set
        value: String,
    },

    /// Show configuration file path
    Path,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Tabs => commands::tabs::run(self).await,
            Commands::Tree { tab, all } => commands::page::tree(self, tab, *all).await,
            Commands::Resolve {
                tab,
                backend_node_ids,
            } => commands::page::resolve(self, tab, backend_node_ids).await,
            Commands::Click { tab, target } => commands::page::click(self, tab, target).await,
            Commands::Fill { tab, target, text } => {
                commands::page::fill(self, tab, target, text).await
            }
            Commands::Eval { tab, script } => commands::page::eval(self, tab, script).await,
            Commands::Config { command } => commands::config::run(self, command).await,
        }
    }
}
