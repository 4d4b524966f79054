//! ZSim debug server binary.
//!
//! Usage: `emu-zsim [--config FILE] [--model NAME]`
//!
//! Builds the machine and serves JSON-RPC on stdin/stdout. Logs go to
//! stderr; set `RUST_LOG` to change the level.

use std::path::PathBuf;
use std::process;

use emu_zsim::mcp::McpServer;
use emu_zsim::{Debugger, MemoryModel, PredefinedModel, ZSimConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct CliArgs {
    config_path: Option<PathBuf>,
    model: Option<String>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        model: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                cli.config_path = args.get(i).map(PathBuf::from);
            }
            "--model" => {
                i += 1;
                cli.model = args.get(i).cloned();
            }
            "-h" | "--help" => {
                eprintln!("Usage: emu-zsim [--config FILE] [--model NAME]");
                eprintln!();
                eprintln!("Models:");
                for model in PredefinedModel::ALL {
                    eprintln!("  {}", model.name());
                }
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(2);
            }
        }
        i += 1;
    }
    cli
}

fn make_config(cli: &CliArgs) -> Result<ZSimConfig, emu_zsim::ConfigError> {
    let mut config = match &cli.config_path {
        Some(path) => ZSimConfig::load(path)?,
        None => ZSimConfig::default(),
    };
    if let Some(name) = &cli.model {
        let model: PredefinedModel = name.parse()?;
        config.memory_model = MemoryModel::Predefined(model);
    }
    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();
    let config = match make_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(%e, "invalid configuration");
            process::exit(1);
        }
    };
    let debugger = match Debugger::from_config(&config) {
        Ok(debugger) => debugger,
        Err(e) => {
            error!(%e, "cannot build machine");
            process::exit(1);
        }
    };

    let mut server = McpServer::new(debugger);
    if let Err(e) = server.run() {
        error!(%e, "debug server stopped");
        process::exit(1);
    }
    info!("bye");
}
