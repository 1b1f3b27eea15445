//! Warden launcher.
//!
//! `warden serve` runs the MCP server on stdio; `warden config check`
//! validates the whitelist configuration and exits. The process exits 0 on
//! clean shutdown and non-zero on fatal initialization failure.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use warden_mcp::{McpServer, McpServerConfig, SessionFacade};
use warden_protocol::WardenConfig;

#[derive(Parser, Debug)]
#[command(name = "warden", about = "Policy-gated command execution service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file path (overrides MCP_SHELL_CONFIG_PATH)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server (stdio transport)
    ///
    /// Runs a JSON-RPC 2.0 server over stdin/stdout. The server exposes
    /// tools for validated command execution, the durable job queue, and
    /// the approval center.
    Serve {
        /// Mirror file-level logs to stderr
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Configuration utilities
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Load the configuration, validate it, and print the whitelist
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve { verbose: false }) {
        Command::Serve { verbose } => serve(config, verbose),
        Command::Config {
            action: ConfigAction::Check,
        } => check_config(config),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<WardenConfig> {
    match path {
        Some(path) => WardenConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => WardenConfig::load().context("loading configuration"),
    }
}

fn serve(config: WardenConfig, verbose: bool) -> Result<()> {
    let log_buffer = warden_logging::init_logging(warden_logging::LogConfig {
        app_name: "warden",
        verbose,
    })
    .context("initializing logging")?;

    config.check().context("configuration rejected")?;

    let queue_dir = warden_protocol::paths::queue_dir();
    info!(queue_dir = %queue_dir.display(), "starting warden");

    let session = SessionFacade::start(config, queue_dir, Some(log_buffer))
        .context("starting session facade")?;

    let mut server =
        McpServer::new(McpServerConfig::default(), session).context("starting MCP server")?;

    let result = server.run();

    // stdin closed or the loop failed; either way, drain children and stop
    // the background threads before reporting.
    server.session().shutdown();

    if let Err(e) = &result {
        error!(error = %e, "server loop ended with error");
    }
    result
}

fn check_config(config: WardenConfig) -> Result<()> {
    config.check().context("configuration rejected")?;

    println!("configuration OK");
    println!(
        "  {} whitelisted command(s), max_concurrent={}, default_timeout_ms={}",
        config.patterns.len(),
        config.max_concurrent,
        config.default_timeout_ms
    );
    for compiled in &config.patterns {
        let p = &compiled.pattern;
        println!(
            "  - {} ({}){}",
            p.command,
            if p.description.is_empty() {
                "no description"
            } else {
                p.description.as_str()
            },
            if p.requires_confirmation {
                " [requires confirmation]"
            } else {
                ""
            }
        );
    }
    Ok(())
}
