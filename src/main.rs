use anyhow::Context;
use clap::Parser;
use rds_monitoring_mcp::config::McpConfig;
use rds_monitoring_mcp::logging::init_logging;
use rds_monitoring_mcp::mcp::McpServer;
use rds_monitoring_mcp::monitoring::{Collaborators, InMemoryRdsBackend, RdsMonitoringService};
use rds_monitoring_mcp::RdsMonitoringHandler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rds-monitoring-mcp")]
#[command(about = "MCP server for Amazon RDS monitoring and performance analysis")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long = "generate-config")]
    generate_config: bool,

    /// Serve MCP over stdin/stdout
    #[arg(long)]
    stdio: bool,

    /// TCP port on 127.0.0.1 (ignored with --stdio)
    #[arg(long)]
    port: Option<u16>,

    /// Maximum number of items returned by list operations
    #[arg(long = "max-items")]
    max_items: Option<usize>,

    /// Disable mutating tools (default)
    #[arg(long, overrides_with = "no_readonly")]
    readonly: bool,

    /// Enable CreatePerformanceReport
    #[arg(long = "no-readonly")]
    no_readonly: bool,

    /// Also expose every resource as a tool
    #[arg(long = "register-resources-as-tools")]
    register_resources_as_tools: bool,

    /// JSON fixtures for the in-memory RDS backend
    #[arg(long, value_name = "FILE")]
    fixtures: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(long = "log-level", env = "RDS_MCP_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// CLI フラグで設定を上書き
    fn apply(&self, config: &mut McpConfig) {
        if self.stdio {
            config.server.stdio = true;
        }
        if let Some(port) = self.port {
            config.server.bind_addr = format!("127.0.0.1:{}", port);
        }
        if let Some(max_items) = self.max_items {
            config.server.max_items = max_items;
        }
        if self.no_readonly {
            config.server.readonly = false;
        } else if self.readonly {
            config.server.readonly = true;
        }
        if self.register_resources_as_tools {
            config.server.register_resources_as_tools = true;
        }
        if let Some(fixtures) = &self.fixtures {
            config.monitoring.fixtures = Some(fixtures.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        print!("{}", McpConfig::sample_toml()?);
        return Ok(());
    }

    let mut config = McpConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    let _log_guard = init_logging(&config.logging)?;

    let backend = match &config.monitoring.fixtures {
        Some(path) => InMemoryRdsBackend::from_json_file(path)
            .with_context(|| format!("failed to load fixtures from {}", path.display()))?,
        None => {
            warn!("No fixtures configured; serving an empty in-memory RDS backend");
            InMemoryRdsBackend::new()
        }
    };

    let service = RdsMonitoringService::new(
        Collaborators::in_memory(Arc::new(backend)),
        config.service_settings(),
    )?;
    let handler = RdsMonitoringHandler::new(Arc::new(service))
        .with_resources_as_tools(config.server.register_resources_as_tools);
    let server = McpServer::new(Arc::new(handler));

    info!(
        "Starting rds-monitoring-mcp {} (readonly: {}, max_items: {})",
        env!("CARGO_PKG_VERSION"),
        config.server.readonly,
        config.server.max_items
    );

    if config.server.stdio {
        server.run_stdio().await?;
    } else {
        server.run(&config.server.bind_addr).await?;
    }

    Ok(())
}
