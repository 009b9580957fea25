//! Command-line interface definition for contextform
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for signing in, listing documents, and chatting.

use clap::{Parser, Subcommand};

/// contextform - chat with an assistant that edits your Onshape model
#[derive(Parser, Debug, Clone)]
#[command(name = "contextform")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the backend server URL from config
    #[arg(long, global = true, env = "CONTEXTFORM_SERVER")]
    pub server: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for contextform
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Save Onshape API credentials for later sessions
    ///
    /// Missing values are prompted for interactively.
    Login {
        /// Account email
        #[arg(long)]
        email: Option<String>,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Onshape API access key
        #[arg(long, env = "ONSHAPE_ACCESS_KEY")]
        access_key: Option<String>,

        /// Onshape API secret key
        #[arg(long, env = "ONSHAPE_SECRET_KEY", hide_env_values = true)]
        secret_key: Option<String>,
    },

    /// Forget saved credentials
    Logout,

    /// List documents accessible with the saved credentials
    Documents,

    /// Start an interactive design session on a document
    Chat {
        /// Document id; prompts for a choice when omitted
        #[arg(short, long)]
        document: Option<String>,
    },
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            server: None,
            command: Commands::Documents,
        }
    }
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
