mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use registry::CapabilityRegistry;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vdw_core::{Capability, ToolMetadata};

use crate::config::{VdwConfig, CONFIG_FILE};

const DEFAULT_CONFIG_DIR: &str = ".vdw";

#[derive(Parser)]
#[command(name = "vdw")]
#[command(about = "Capability registry tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the database
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_DIR)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config directory, config file and database
    Init {
        /// Project name written to config.toml
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show registry table counts
    Status,
    /// Manage registered tools
    #[command(subcommand)]
    Tools(ToolCommands),
    /// Manage the capability vocabulary
    #[command(subcommand)]
    Capabilities(CapabilityCommands),
}

#[derive(Subcommand)]
enum ToolCommands {
    /// Register a tool described by a JSON file
    Register { file: PathBuf },
    Show { tool_id: String },
    List {
        /// Include deprecated tools
        #[arg(long)]
        all: bool,
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Tools offering a capability, strongest first
    Find {
        capability: String,
        #[arg(long, default_value_t = 0.0)]
        min_strength: f64,
    },
    /// Compare required capabilities against the registry
    Gaps {
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
    /// Record one execution of a tool
    Usage {
        tool_id: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        duration_ms: f64,
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        error: Option<String>,
    },
    Deprecate {
        tool_id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        replacement: Option<String>,
    },
    /// Aggregated execution metrics over a time window
    Analytics {
        #[arg(long)]
        tool: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Execution log of one tool, oldest first
    History { tool_id: String },
}

#[derive(Subcommand)]
enum CapabilityCommands {
    /// Add or update a capability
    Define {
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        category: Option<String>,
    },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = VdwConfig::load(&cli.dir)?;
    init_tracing(&config.logging.filter);

    match cli.command {
        Commands::Init { name } => init_project(&cli.dir, config, name).await,
        Commands::Status => show_status(&cli.dir, &config).await,
        Commands::Tools(command) => run_tools(&cli.dir, config, command).await,
        Commands::Capabilities(command) => run_capabilities(&cli.dir, config, command).await,
    }
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();
}

async fn init_project(dir: &Path, mut config: VdwConfig, name: Option<String>) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        println!("Already initialized at {}", dir.display());
        return Ok(());
    }

    if let Some(name) = name {
        config.project.name = name;
    }
    config.save(dir)?;
    println!("  ✓ Created {}", config_path.display());

    let pool = connect(dir, &config).await?;
    pool.close().await;
    println!("  ✓ Created database {}", config.database_path(dir).display());

    info!(project = %config.project.name, "Project initialized");
    Ok(())
}

async fn show_status(dir: &Path, config: &VdwConfig) -> Result<()> {
    let pool = connect(dir, config).await?;
    let counts = db::ToolRepository::new(pool).counts().await?;
    print_json(&json!({
        "project": config.project.name,
        "database": config.database_path(dir),
        "tools": counts.tools,
        "capabilities": counts.capabilities,
        "tool_capabilities": counts.tool_capabilities,
        "dependencies": counts.dependencies,
        "performance_logs": counts.performance_logs,
    }))
}

async fn run_tools(dir: &Path, config: VdwConfig, command: ToolCommands) -> Result<()> {
    let registry = open_registry(dir, config).await?;

    match command {
        ToolCommands::Register { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let tool: ToolMetadata = serde_json::from_str(&content)
                .with_context(|| format!("Invalid tool description in {}", file.display()))?;
            let stored = registry.register_tool(tool).await?;
            print_json(&stored)
        }
        ToolCommands::Show { tool_id } => match registry.get_tool(&tool_id) {
            Some(tool) => print_json(&tool),
            None => bail!("Tool not found: {}", tool_id),
        },
        ToolCommands::List { all, created_by } => {
            print_json(&registry.list_tools(all, created_by.as_deref()))
        }
        ToolCommands::Find {
            capability,
            min_strength,
        } => print_json(&registry.find_by_capability(&capability, min_strength)),
        ToolCommands::Gaps { capabilities } => {
            print_json(&registry.analyze_capability_gap(capabilities.as_slice()))
        }
        ToolCommands::Usage {
            tool_id,
            project,
            duration_ms,
            failed,
            error,
        } => {
            let entry = registry
                .record_usage(&tool_id, &project, duration_ms, !failed, error)
                .await?;
            print_json(&entry)
        }
        ToolCommands::Deprecate {
            tool_id,
            reason,
            replacement,
        } => {
            let tool = registry
                .deprecate_tool(&tool_id, &reason, replacement.as_deref())
                .await?;
            print_json(&tool)
        }
        ToolCommands::Analytics {
            tool,
            project,
            days,
        } => {
            let analytics = registry
                .get_performance_analytics(tool.as_deref(), project.as_deref(), days)
                .await?;
            print_json(&analytics)
        }
        ToolCommands::History { tool_id } => {
            if registry.get_tool(&tool_id).is_none() {
                bail!("Tool not found: {}", tool_id);
            }
            print_json(&registry.usage_history(&tool_id).await?)
        }
    }
}

async fn run_capabilities(
    dir: &Path,
    config: VdwConfig,
    command: CapabilityCommands,
) -> Result<()> {
    let registry = open_registry(dir, config).await?;

    match command {
        CapabilityCommands::Define {
            name,
            description,
            category,
        } => {
            let mut capability = Capability::new(name, description);
            if let Some(category) = category {
                capability = capability.with_category(category);
            }
            print_json(&registry.define_capability(capability).await?)
        }
        CapabilityCommands::List => print_json(&registry.list_capabilities().await?),
    }
}

async fn connect(dir: &Path, config: &VdwConfig) -> Result<SqlitePool> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let url = config.database_url(dir);
    debug!(url = %url, "Opening database");

    let pool = db::create_pool(&url)
        .await
        .with_context(|| format!("Failed to open database {}", url))?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

async fn open_registry(dir: &Path, config: VdwConfig) -> Result<CapabilityRegistry> {
    let pool = connect(dir, &config).await?;
    Ok(CapabilityRegistry::open(pool, config.registry).await?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
