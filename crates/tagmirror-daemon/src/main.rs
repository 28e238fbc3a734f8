//! tagmirror binary.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tagmirror_daemon::{Settings, daemon, telemetry};

/// Mirrors git repositories and serves files by semantic version
#[derive(Parser, Debug)]
#[command(name = "tagmirror")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "TAGMIRROR_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, global = true, value_name = "FILTER", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Keep every configured mirror synced until interrupted
    Run,

    /// Sync one repository and print a file at a version
    Get {
        repository: String,

        /// Semantic-version constraint or revision
        version: String,

        path: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration and list the repositories
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level);

    let settings = Settings::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command {
        Commands::Run => daemon::run(settings).await,
        Commands::Get {
            repository,
            version,
            path,
            output,
        } => {
            let file = daemon::get(&settings, &repository, &version, &path).await?;
            match output {
                Some(output) => std::fs::write(&output, &file.content)
                    .with_context(|| format!("failed to write {}", output.display()))?,
                None => std::io::stdout()
                    .lock()
                    .write_all(&file.content)
                    .context("failed to write to stdout")?,
            }
            Ok(())
        },
        Commands::Check => {
            for line in daemon::check(&settings)? {
                println!("{}", line);
            }
            Ok(())
        },
    }
}
