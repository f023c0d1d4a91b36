mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use futures::StreamExt;
use stackmock::client::{self, EngineClient};
use stackmock::config::StackmockConfig;
use stackmock::engine_api::EngineServer;
use stackmock::world::WorldModel;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        StackmockConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.stacks_dir {
        config.stacks.dir = dir;
    }
    if let Some(mode) = cli.engine {
        config.engine.mode = mode;
    }
    if cli.docker_host.is_some() {
        config.engine.docker_host = cli.docker_host;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    let _log_guard = config.logging.init()?;

    info!("🚀 Stackmock starting up...");

    match cli.command {
        Commands::Serve { socket } => {
            if let Some(socket) = socket {
                config.engine.socket_path = Some(socket);
            }
            serve(&config).await?;
        }

        Commands::Ps { all, project } => {
            let engine = client::connect(&config)
                .await
                .context("Failed to reach the container engine")?;
            let containers = engine.list_containers(all, project.as_deref()).await?;

            if containers.is_empty() {
                info!("No containers found");
            } else {
                println!(
                    "{:<12} {:<25} {:<15} {:<30} {:<25} {:<20}",
                    "CONTAINER ID", "IMAGE", "PROJECT", "STATUS", "PORTS", "NAMES"
                );
                println!("{}", "─".repeat(130));
                for container in &containers {
                    let short_id = container.id.chars().take(12).collect::<String>();
                    let short_image = if container.image.len() > 24 {
                        format!("{}...", container.image.chars().take(21).collect::<String>())
                    } else {
                        container.image.clone()
                    };
                    println!(
                        "{:<12} {:<25} {:<15} {:<30} {:<25} {:<20}",
                        short_id,
                        short_image,
                        container.project,
                        container.status,
                        container.ports.join(", "),
                        container.name
                    );
                }
                println!();
                info!("Found {} containers (showing all: {})", containers.len(), all);
            }
            engine.close().await?;
        }

        Commands::Stats { project } => {
            let engine = client::connect(&config)
                .await
                .context("Failed to reach the container engine")?;
            let entries = engine.stats(&project).await?;
            println!(
                "{:<25} {:>8} {:>22} {:>8} {:>6}",
                "NAME", "CPU %", "MEM USAGE / LIMIT", "MEM %", "PIDS"
            );
            for entry in &entries {
                match &entry.usage {
                    Some(usage) => println!(
                        "{:<25} {:>7.2}% {:>10} / {:<10} {:>7.2}% {:>6}",
                        entry.name,
                        usage.cpu_percent,
                        human_bytes(usage.memory_usage),
                        human_bytes(usage.memory_limit),
                        usage.memory_percent,
                        usage.pids
                    ),
                    None => println!("{:<25} {:>8}", entry.name, "--"),
                }
            }
            engine.close().await?;
        }

        Commands::Events => {
            let engine = client::connect(&config)
                .await
                .context("Failed to reach the container engine")?;
            let mut events = engine.events().await?;
            loop {
                tokio::select! {
                    next = events.next() => match next {
                        Some(Ok(event)) => println!("{}", serde_json::to_string(&event)?),
                        Some(Err(e)) => {
                            warn!("Event stream failed: {}", e);
                            break;
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            engine.close().await?;
        }
    }

    Ok(())
}

async fn serve(config: &StackmockConfig) -> Result<()> {
    let world = WorldModel::load(&config.stacks.dir, &config.stacks.override_file)
        .with_context(|| format!("Failed to load stacks from {}", config.stacks.dir.display()))?;
    let server = EngineServer::new(Arc::new(world), config.server_settings());
    let socket = config.socket_path();
    server
        .serve(&socket, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
        .with_context(|| format!("Engine API on {} failed", socket.display()))?;
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}
