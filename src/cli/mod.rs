use stackmock::config::EngineMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackmock")]
#[command(about = "Docker Engine API for compose stacks: a synthetic engine and a real-engine adapter")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, env = "STACKMOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding one sub-directory per stack
    #[arg(long, env = "STACKMOCK_STACKS_DIR")]
    pub stacks_dir: Option<PathBuf>,

    /// Engine the facade talks to
    #[arg(long, value_enum, env = "STACKMOCK_ENGINE")]
    pub engine: Option<EngineMode>,

    /// Real engine socket, e.g. unix:///var/run/docker.sock
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the synthetic engine on a Unix socket
    Serve {
        /// Socket path to listen on
        #[arg(short, long, env = "STACKMOCK_SOCKET")]
        socket: Option<PathBuf>,
    },

    /// List containers
    Ps {
        /// Show all containers (default shows just running)
        #[arg(short, long)]
        all: bool,

        /// Only containers of this compose project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Resource usage of a project's running containers
    Stats {
        /// Compose project name
        project: String,
    },

    /// Stream lifecycle events as JSON lines
    Events,
}
