use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Attribute, Cell, Color, Table};
use mcp_search_hub::config::{
    default_config_path, get_config, write_default_config, Config, LogFormat, CONFIG_FILE_NAME,
};
use mcp_search_hub::mcp::McpServer;
use mcp_search_hub::models::{ConnectionState, SearchOptions, SearchOutcome, SearchType};
use mcp_search_hub::providers::{McpConnector, ProviderRegistry};
use mcp_search_hub::search::build_orchestrator;
use mcp_search_hub::ui::{self, Spinner, Status};
use mcp_search_hub::utils::HistoryService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MCP Search Hub - federated search across MCP providers
#[derive(Parser, Debug)]
#[command(name = "mcp-search-hub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search the web, GitHub, local files and documentation through MCP providers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Automatic based on terminal (table if TTY, JSON otherwise)
    Auto,
    /// Table format (human-readable)
    Table,
    /// JSON format (machine-readable)
    Json,
    /// Plain text format
    Plain,
}

impl OutputFormat {
    fn resolve(self) -> Self {
        match self {
            OutputFormat::Auto if ui::is_terminal() => OutputFormat::Table,
            OutputFormat::Auto => OutputFormat::Json,
            other => other,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search across the connected providers
    #[command(alias = "s")]
    Search {
        /// Search query string
        query: String,

        /// Which providers to search (web, github, files, docs, code, all)
        #[arg(long, short = 't', default_value_t = SearchType::All)]
        r#type: SearchType,

        /// Maximum number of ranked results
        #[arg(long, short = 'm')]
        max_results: Option<usize>,

        /// Overall search deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Annotate results with an LLM (needs an API key)
        #[arg(long)]
        enrich: bool,
    },

    /// Show provider connection health
    Status,

    /// List providers and their capabilities
    Providers {
        /// Show tool, resource and prompt names
        #[arg(long, short)]
        detailed: bool,
    },

    /// Run as an MCP server
    #[command(alias = "mcp")]
    Serve {
        /// Serve streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,

        /// Port for HTTP mode
        #[arg(long, short, default_value_t = 3000)]
        port: u16,

        /// Host to bind to for HTTP mode
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Show recent searches
    History {
        /// Number of entries to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,

        /// Delete the history file
        #[arg(long)]
        clear: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Where to write it (default: the user config directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| format!("mcp_search_hub={}", level));
    let json = config.logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = get_config(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&cli, &config);

    match &cli.command {
        Commands::InitConfig { path, force } => {
            let path = path
                .clone()
                .or_else(default_config_path)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            write_default_config(&path, *force)?;
            if !cli.quiet {
                ui::print_status(Status::Success, &format!("Wrote {}", path.display()));
            }
            return Ok(());
        }
        Commands::History { limit, clear } => {
            let history = match &config.history.path {
                Some(path) => HistoryService::with_path(path),
                None => HistoryService::new(),
            };
            if *clear {
                history.clear()?;
                if !cli.quiet {
                    ui::print_status(Status::Success, "History cleared");
                }
            } else {
                output_history(&history.read_entries(*limit)?, cli.output.resolve())?;
            }
            return Ok(());
        }
        _ => {}
    }

    let registry = ProviderRegistry::new(Arc::new(McpConnector::new()), config.reconnect);
    registry.init(config.provider_configs()).await;

    let result = run_command(&cli, &config, &registry).await;
    registry.shutdown().await;
    result
}

async fn run_command(cli: &Cli, config: &Config, registry: &ProviderRegistry) -> Result<()> {
    let format = cli.output.resolve();

    match &cli.command {
        Commands::Search {
            query,
            r#type,
            max_results,
            timeout_ms,
            enrich,
        } => {
            let mut options = SearchOptions::new().enrich(*enrich);
            if let Some(max) = max_results {
                options = options.max_results(*max);
            }
            if let Some(timeout) = timeout_ms {
                options = options.timeout_ms(*timeout);
            }

            let spinner = if !cli.quiet && format != OutputFormat::Json && ui::is_terminal() {
                Spinner::new(&format!("Searching {} for \"{}\"", r#type, query))
            } else {
                Spinner::hidden()
            };

            let hub = build_orchestrator(config, registry.clone());
            let outcome = tokio::select! {
                outcome = hub.search(query.as_str(), *r#type, options) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    spinner.finish_with_error("Interrupted");
                    return Ok(());
                }
            };

            match outcome {
                Ok(outcome) => {
                    spinner.clear();
                    output_outcome(&outcome, format, cli.quiet)?;
                }
                Err(e) => {
                    spinner.finish_with_error(&e.to_string());
                    return Err(e.into());
                }
            }
        }

        Commands::Status => {
            let status = registry.get_status().await;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["Provider", "State", "Reconnects", "Last connected", "Last error"]);
            for (name, provider) in &config.providers {
                let row = match status.get(name) {
                    Some(s) => vec![
                        Cell::new(name).add_attribute(Attribute::Bold),
                        Cell::new(ui::styled_state(s.state)),
                        Cell::new(s.reconnect_attempts),
                        Cell::new(
                            s.last_connected_at
                                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                                .unwrap_or_default(),
                        ),
                        Cell::new(ui::truncate_with_ellipsis(
                            s.last_error.as_deref().unwrap_or_default(),
                            60,
                        )),
                    ],
                    None => vec![
                        Cell::new(name).add_attribute(Attribute::Bold),
                        Cell::new(ui::styled_state(ConnectionState::Disconnected)),
                        Cell::new(0),
                        Cell::new(""),
                        Cell::new(if provider.enabled { "not connected" } else { "disabled" })
                            .fg(Color::DarkGrey),
                    ],
                };
                table.add_row(row);
            }
            println!("{table}");
        }

        Commands::Providers { detailed } => {
            let providers = registry.list_providers().await;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&providers)?);
                return Ok(());
            }

            if providers.is_empty() {
                ui::print_status(Status::Warning, "No providers connected");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["Provider", "Transport", "State", "Tools", "Resources", "Prompts"]);
            for info in &providers {
                let caps = &info.capabilities;
                let count = |listed: bool, n: usize| if listed { n.to_string() } else { "-".to_string() };
                table.add_row(vec![
                    Cell::new(&info.name).add_attribute(Attribute::Bold),
                    Cell::new(&info.transport),
                    Cell::new(ui::styled_state(info.state)),
                    Cell::new(count(caps.tools.is_some(), caps.tools().len())),
                    Cell::new(count(caps.resources.is_some(), caps.resources().len())),
                    Cell::new(count(caps.prompts.is_some(), caps.prompts().len())),
                ]);
            }
            println!("{table}");

            if *detailed {
                for info in &providers {
                    ui::print_section(&info.name);
                    for tool in info.capabilities.tools() {
                        println!(
                            "  {} {}",
                            tool.name,
                            ui::truncate_with_ellipsis(tool.description.as_deref().unwrap_or_default(), 70)
                        );
                    }
                }
            }
        }

        Commands::Serve { http, port, host } => {
            let hub = build_orchestrator(config, registry.clone());
            let server = McpServer::new(&hub)?;

            if *http {
                let addr = format!("{}:{}", host, port);
                let (bound_addr, handle) = server.run_http(&addr).await?;
                tracing::info!(%bound_addr, "MCP server listening");
                tokio::select! {
                    joined = handle => joined.map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?,
                    _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
                }
            } else {
                tokio::select! {
                    served = server.run() => served?,
                    _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
                }
            }
        }

        Commands::History { .. } | Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn output_outcome(outcome: &SearchOutcome, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
            return Ok(());
        }
        OutputFormat::Plain => {
            for result in &outcome.results {
                println!("{}. {} [{}] ({:.1})", result.rank, result.title, result.source, result.score);
                println!("   {}", result.url);
                if !result.snippet.is_empty() {
                    println!("   {}", ui::truncate_with_ellipsis(&result.snippet, 160));
                }
                println!();
            }
        }
        OutputFormat::Table | OutputFormat::Auto => {
            ui::print_search_header(outcome);

            let width = ui::terminal_width();
            let title_width = (width / 3).clamp(20, 60);
            let url_width = (width / 3).clamp(20, 70);

            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["#", "Score", "Title", "Source", "URL"]);
            for result in &outcome.results {
                table.add_row(vec![
                    Cell::new(result.rank),
                    Cell::new(format!("{:.1}", result.score)),
                    Cell::new(ui::truncate_with_ellipsis(&result.title, title_width))
                        .add_attribute(Attribute::Bold),
                    Cell::new(format!("{} {}", ui::source_icon(&result.source), result.source)),
                    Cell::new(ui::truncate_with_ellipsis(&result.url, url_width)),
                ]);
            }
            if !outcome.is_empty() {
                println!("{table}");
            }
        }
    }

    if !quiet {
        ui::print_failures(outcome);
    }
    Ok(())
}

fn output_history(
    entries: &[mcp_search_hub::search::SearchRecord],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
        OutputFormat::Plain => {
            for entry in entries {
                println!(
                    "{}\t{}\t{}\t{}\t{}ms",
                    entry.timestamp.to_rfc3339(),
                    entry.search_type,
                    entry.query,
                    entry.result_count,
                    entry.elapsed_ms
                );
            }
        }
        OutputFormat::Table | OutputFormat::Auto => {
            let mut table = Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL);
            table.set_header(vec!["When", "Type", "Query", "Results", "Elapsed", "Cached"]);
            for entry in entries {
                table.add_row(vec![
                    Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S")),
                    Cell::new(entry.search_type),
                    Cell::new(ui::truncate_with_ellipsis(&entry.query, 50)),
                    Cell::new(entry.result_count),
                    Cell::new(format!("{}ms", entry.elapsed_ms)),
                    Cell::new(if entry.cached { "yes" } else { "" }),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
