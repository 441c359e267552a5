//! Operator-side coordinator for distributed validator key generation.

use clap::{Parser, Subcommand};
use dkg_operator::{keygen, server};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dkg-operator")]
#[command(about = "Operator-side DKG ceremony coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the operator's RSA identity.
    Keygen {
        /// Output directory for key files.
        #[arg(long, default_value = "./keygen-output")]
        output_dir: PathBuf,

        /// Overwrite existing key files.
        #[arg(long)]
        force: bool,
    },

    /// Serve ceremony requests.
    Start {
        /// TLS listen port.
        #[arg(long)]
        port: u16,

        /// Path to the PEM-encoded operator RSA private key.
        #[arg(long)]
        private_key: PathBuf,

        /// Path to the TLS certificate.
        #[arg(long)]
        cert: PathBuf,

        /// Path to the TLS key.
        #[arg(long)]
        key: PathBuf,

        /// This node's operator id.
        #[arg(long)]
        operator_id: u64,

        /// Base directory for emitted ceremony results.
        #[arg(long)]
        output_path: PathBuf,

        /// Log level (trace, debug, info, warn, error).
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output_dir, force } => {
            keygen::run(keygen::KeygenArgs { output_dir, force })
        }
        Commands::Start {
            port,
            private_key,
            cert,
            key,
            operator_id,
            output_path,
            log_level,
        } => {
            setup_logging(&log_level);
            server::run(server::StartArgs {
                port,
                private_key,
                cert,
                key,
                operator_id,
                output_path,
            })
            .await
        }
    }
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
