//! toolrelay CLI: call tools on an MCP server from the shell.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use toolrelay_config::{CliOverrides, RelayConfig};
use toolrelay_mcp::{McpServerConfig, McpSession, Tool};

#[derive(Parser)]
#[command(name = "toolrelay", version, about = "Call MCP server tools over stdio")]
struct Cli {
    /// Configured server to use (overrides TOOLRELAY_SERVER and default_server)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Spawn this command as an ad-hoc server instead of a configured one
    #[arg(long, global = true)]
    command: Option<String>,

    /// Argument for --command (repeatable)
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    command_args: Vec<String>,

    /// Timeout for each tool call in milliseconds (ad-hoc servers only)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// List the tools the server offers
    Tools {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a tool and print its text result
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Show server identity and session details
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RelayConfig::load(CliOverrides {
        server: cli.server.clone(),
        log_level: cli.verbose.then(|| "debug".to_string()),
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let (name, server) = resolve_server(&cli, &config)?;
    let session = McpSession::start(name.clone(), &server)
        .await
        .with_context(|| format!("Failed to start MCP server '{name}'"))?;

    let outcome = run(&session, cli.action).await;
    session.close().await;
    outcome
}

fn resolve_server(cli: &Cli, config: &RelayConfig) -> Result<(String, McpServerConfig)> {
    if let Some(command) = &cli.command {
        let mut server =
            McpServerConfig::new(command.clone()).with_args(cli.command_args.iter().cloned());
        if let Some(timeout_ms) = cli.timeout_ms {
            server = server.with_timeout_ms(timeout_ms);
        }
        return Ok((command.clone(), server));
    }

    config
        .select_server(cli.server.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))
}

async fn run(session: &McpSession, action: Action) -> Result<()> {
    match action {
        Action::Tools { json } => {
            let tools = session.list_tools()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                print_tools(&tools)?;
            }
        }
        Action::Call { tool, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let text = session
                .call_tool(&tool, arguments)
                .await
                .with_context(|| format!("Tool '{tool}' failed"))?;
            println!("{text}");
        }
        Action::Info => {
            let info = session.server_info();
            println!(
                "server:   {} ({})",
                info.map(|i| i.name.as_str()).unwrap_or("unknown"),
                info.map(|i| i.version.as_str()).unwrap_or("?")
            );
            println!("protocol: {}", session.protocol_version());
            println!("state:    {}", session.state());
            println!("session:  {}", session.session_id());
            println!("tools:    {}", session.list_tools()?.len());
        }
    }
    Ok(())
}

fn print_tools(tools: &[Tool]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if tools.is_empty() {
        writeln!(out, "No tools available.")?;
        return Ok(());
    }
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for tool in tools {
        writeln!(out, "{:width$}  {}", tool.name, tool.description)?;
    }
    Ok(())
}
