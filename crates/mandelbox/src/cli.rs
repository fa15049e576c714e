//! Clap derive structures for the `mandelbox` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// mandelbox -- launch a cloud-streamed browser from the command line
#[derive(Debug, Parser)]
#[command(
    name = "mandelbox",
    version,
    about = "Launch a cloud-streamed browser from the command line",
    long_about = "Signs in, checks the subscription, finds the nearest region, asks the\n\
        webserver for a mandelbox and hands its connection details to the local\n\
        streaming protocol.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "MANDELBOX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a session and run the streaming protocol until it closes
    Launch(LaunchArgs),

    /// Exchange a login callback URL for cached tokens
    Login(LoginArgs),

    /// Probe regions and list them nearest first
    Regions(RegionsArgs),

    /// Print the URL that starts an interactive login
    AuthUrl,

    /// Inspect or create the config file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Ask for this region instead of probing (e.g. us-east-1)
    #[arg(long, short = 'r')]
    pub region: Option<String>,

    /// Read the account password from stdin to unlock a saved config token
    #[arg(long, conflicts_with = "ask_password")]
    pub password_stdin: bool,

    /// Prompt for the account password on the terminal
    #[arg(long)]
    pub ask_password: bool,

    /// Open these URLs in the streamed browser once connected
    #[arg(long = "open-url", value_name = "URL")]
    pub open_urls: Vec<String>,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// The redirect URL the identity provider sent the browser to
    #[arg(long)]
    pub callback_url: String,
}

#[derive(Debug, Args)]
pub struct RegionsArgs {
    /// Probe every known region, not just the allowed ones
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets masked
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Webserver base URL
        #[arg(long)]
        webserver_url: Option<String>,

        /// Path to the streaming protocol binary
        #[arg(long)]
        protocol_path: Option<PathBuf>,
    },
}
