//! Fault Injector - fault-injecting HTTP proxy
//!
//! Delays, forced errors and connection aborts for resilience testing.

use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use fault_injector::{
    cli::{Cli, Command, OutputFormat},
    config::Config,
    gateway::FaultServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Check { format }) => run_check(&config, format),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> fault_injector::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(ref upstream) = cli.upstream {
        config.server.upstream = Some(upstream.clone());
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    config.validate()?;
    Ok(config)
}

/// Print the validated fault stack
fn run_check(config: &Config, format: OutputFormat) -> ExitCode {
    match format {
        OutputFormat::Json => {
            let doc = json!({
                "listen": format!("{}:{}", config.server.host, config.server.port),
                "upstream": config.server.upstream,
                "seed": config.seed,
                "faults": config.faults,
            });
            match serde_json::to_string_pretty(&doc) {
                Ok(out) => println!("{out}"),
                Err(e) => {
                    eprintln!("❌ Failed to serialize to JSON: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        OutputFormat::Text => {
            println!("✅ Configuration valid\n");
            println!("Listen:   {}:{}", config.server.host, config.server.port);
            println!(
                "Upstream: {}",
                config.server.upstream.as_deref().unwrap_or("(echo)")
            );
            if let Some(seed) = config.seed {
                println!("Seed:     {seed}");
            }

            if config.faults.is_empty() {
                println!("\nNo faults configured.");
            } else {
                println!("\nFault stack (outermost first):");
                for (i, entry) in config.faults.iter().enumerate() {
                    // validate() already built every fault once
                    if let Ok(fault) = entry.to_fault() {
                        println!("  {}. {fault}  ratio={}", i + 1, entry.ratio);
                    }
                }
            }
        }
    }

    ExitCode::SUCCESS
}

/// Run the fault-injecting server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        faults = config.faults.len(),
        "Starting fault injector"
    );

    let server = match FaultServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Fault injector shutdown complete");
    ExitCode::SUCCESS
}
