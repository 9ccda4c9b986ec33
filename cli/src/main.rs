mod commands;

use chrono::Local;
use clap::{Parser, Subcommand};
use commands::{backup::BackupCommand, parity::ParityCommand, restore::RestoreCommand, Context};
use offsite_core::{BackupDate, SystemRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "offsite",
    about = "Incremental ZFS backups to cold storage",
    long_about = "Offsite snapshots a ZFS dataset, exports the incremental stream between \
                  two dated snapshots, encrypts and splits it into chunks, adds par2 \
                  recovery data and syncs the result to an S3 archival storage class"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        global = true,
        default_value = ".",
        env = "OFFSITE_WORKDIR",
        help = "Directory holding chunk and parity files"
    )]
    workdir: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Snapshot, export, encrypt, split, protect and upload a dataset increment")]
    Backup(BackupCommand),

    #[command(about = "Create or verify par2 files for a filename prefix")]
    Parity(ParityCommand),

    #[command(about = "Decrypt and reassemble local chunk files of an increment")]
    Restore(RestoreCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let ctx = Context {
        workdir: cli.workdir.clone(),
        today: BackupDate::from(Local::now().date_naive()),
        runner: Arc::new(SystemRunner::new()),
        quiet: cli.quiet,
    };
    debug!(today = %ctx.today, workdir = %ctx.workdir.display(), "Starting offsite");

    let result = match cli.command {
        Commands::Backup(ref cmd) => cmd.run(&ctx).await,
        Commands::Parity(ref cmd) => cmd.run(&ctx).await,
        Commands::Restore(ref cmd) => cmd.run(&ctx).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            println!("{:#}", err);
            error!(code, "Run failed");
            ExitCode::from(code)
        }
    }
}

/// Exit code carried by the first `offsite_core::Error` in the chain.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<offsite_core::Error>())
        .map(|e| u8::try_from(e.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> =
            ["offsite", "offsite_core", "offsite_backends", "offsite_integrations"]
                .iter()
                .map(|krate| format!("{krate}={level}"))
                .collect();
        EnvFilter::new(directives.join(","))
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
