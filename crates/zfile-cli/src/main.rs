//! zfile CLI - open a file inside a zone and stream it

use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use zfile_core::{OpenMode, OpenerConfig, ZfileError, ZoneOpener};

#[derive(Parser)]
#[command(name = "zfile")]
#[command(author, version, about = "Read and write files inside zones without leaving the global zone")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of namespace files for bare names (defaults to ZFILE_NS_DIR or /run/zfile/ns)
    #[arg(long, global = true)]
    ns_dir: Option<PathBuf>,

    /// Attempts when the fork sequence is interrupted
    #[arg(long, global = true, default_value_t = zfile_core::config::DEFAULT_MAX_ATTEMPTS)]
    attempts: u32,

    /// Print failures as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a file from inside the zone to stdout
    Cat {
        /// Zone name
        zone: String,
        /// Absolute path as seen inside the zone
        path: String,
    },

    /// Replace a file inside the zone with stdin
    Write {
        /// Zone name
        zone: String,
        /// Absolute path as seen inside the zone
        path: String,
    },

    /// Append stdin to a file inside the zone
    Append {
        /// Zone name
        zone: String,
        /// Absolute path as seen inside the zone
        path: String,
    },
}

impl Commands {
    fn target(&self) -> (&str, &str, OpenMode) {
        match self {
            Self::Cat { zone, path } => (zone.as_str(), path.as_str(), OpenMode::Read),
            Self::Write { zone, path } => (zone.as_str(), path.as_str(), OpenMode::WriteTruncate),
            Self::Append { zone, path } => (zone.as_str(), path.as_str(), OpenMode::Append),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(e.as_ref(), json);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let directives = log_directives(
        zfile_core::config::debug_enabled(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::new(directives))
        .init();
}

/// Without `ZFILE_DEBUG` nothing is logged; with it, `RUST_LOG` may narrow
/// or widen the debug default.
fn log_directives(debug: bool, rust_log: Option<String>) -> String {
    if !debug {
        return "off".into();
    }
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| "zfile_core=debug,zfile=debug".into())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut config = OpenerConfig::builder().max_attempts(cli.attempts);
    if let Some(dir) = cli.ns_dir {
        config = config.namespace_dir(dir);
    }
    let opener = ZoneOpener::new(config.build());

    let (zone, path, mode) = cli.command.target();
    tracing::debug!(zone, path, %mode, "dispatching open");

    let file = opener.open_path(zone, path, mode).await?;

    // Copying is plain blocking I/O on an fd we already own.
    tokio::task::spawn_blocking(move || copy(file, mode)).await??;

    Ok(())
}

fn copy(mut file: std::fs::File, mode: OpenMode) -> io::Result<()> {
    match mode {
        OpenMode::Read => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut file, &mut stdout)?;
            stdout.flush()
        }
        OpenMode::WriteTruncate | OpenMode::Append => {
            io::copy(&mut io::stdin().lock(), &mut file)?;
            file.sync_all()
        }
    }
}

fn report(e: &(dyn Error + Send + Sync + 'static), json: bool) {
    let structured = e
        .downcast_ref::<ZfileError>()
        .filter(|_| json)
        .and_then(|z| serde_json::to_string(&z.report()).ok());

    match structured {
        Some(line) => eprintln!("{line}"),
        None => eprintln!("zfile: {e}"),
    }
}
