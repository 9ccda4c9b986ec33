use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use offsite_backends::{AwsCliBackend, RemoteStore};
use offsite_core::chunker::split_command;
use offsite_core::crypto::ARCHIVE_CIPHER;
use offsite_core::parity::create_command;
use offsite_core::{
    BackupDate, CommandRunner, DatasetConfig, DateRange, FilenamePrefix, ParityManager,
    ParityReport, Pipeline, PipelineMode, SnapshotTag, DEFAULT_TAG,
};
use offsite_integrations::{SnapshotOutcome, ZfsDataset};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PipelineModeArg {
    /// Abort when any export, encrypt or split stage fails
    Strict,
    /// Log failed stages and continue with parity and upload
    Lenient,
}

impl From<PipelineModeArg> for PipelineMode {
    fn from(arg: PipelineModeArg) -> Self {
        match arg {
            PipelineModeArg::Strict => PipelineMode::Strict,
            PipelineModeArg::Lenient => PipelineMode::Lenient,
        }
    }
}

#[derive(Args)]
pub struct BackupCommand {
    #[arg(long, help = "Name of zfs pool. e.g. tank1")]
    pool: String,

    #[arg(long, help = "Name of zfs dataset. e.g. documents")]
    dataset: String,

    #[arg(
        long = "aws_bucket",
        env = "OFFSITE_AWS_BUCKET",
        help = "Name of the AWS S3 storage bucket"
    )]
    aws_bucket: String,

    #[arg(long = "aws_cli", env = "OFFSITE_AWS_CLI", help = "Path to the AWS CLI executable")]
    aws_cli: String,

    #[arg(long, env = "OFFSITE_CONFIG", help = "Path to config file")]
    config: PathBuf,

    #[arg(
        long = "from_date",
        help = "Start date in \"YYYYMMDD\", defaults to the latest uploaded range end"
    )]
    from_date: Option<BackupDate>,

    #[arg(long = "to_date", help = "End date in \"YYYYMMDD\", defaults to today")]
    to_date: Option<BackupDate>,

    #[arg(long, default_value = DEFAULT_TAG, help = "Prefix of the snapshot name")]
    tag: String,

    #[arg(
        long,
        value_enum,
        default_value_t = PipelineModeArg::Strict,
        help = "How failed pipeline stages are handled"
    )]
    pipeline_mode: PipelineModeArg,

    #[arg(long, help = "Dry run - only print the commands that change state")]
    dry_run: bool,
}

impl BackupCommand {
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let request = BackupRequest {
            dataset: self.dataset.clone(),
            tag: SnapshotTag::new(&self.tag),
            from_date: self.from_date,
            to_date: self.to_date.unwrap_or(ctx.today),
            today: ctx.today,
        };

        let remote = AwsCliBackend::new(&self.aws_cli, &self.aws_bucket, ctx.runner.clone());
        let zfs = ZfsDataset::new(&self.pool, &self.dataset, ctx.runner.clone());
        let orchestrator = Orchestrator {
            runner: ctx.runner.clone(),
            remote: Box::new(remote),
            zfs,
            workdir: ctx.workdir.clone(),
            mode: self.pipeline_mode.into(),
            dry_run: self.dry_run,
            show_progress: !ctx.quiet && !self.dry_run,
        };

        if self.dry_run {
            println!("DRY RUN - no snapshot, chunk or upload will be made");
        }

        let config = DatasetConfig::load(&self.config).await?;
        match orchestrator.run(&request, &config).await? {
            BackupOutcome::Skipped => println!("From and To are the same date. Skipping."),
            BackupOutcome::Planned { range } => {
                println!("Dry run completed for {} {}", request.dataset, range.folder_name());
            }
            BackupOutcome::Completed { range, prefix, parity } => {
                println!("Backup completed: {} {}", request.dataset, range.folder_name());
                println!("Chunks: {}*", prefix);
                println!(
                    "Parity: {} created, {} already present",
                    parity.processed.len(),
                    parity.skipped.len()
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub dataset: String,
    pub tag: SnapshotTag,
    /// Resolved from the remote listing when unset.
    pub from_date: Option<BackupDate>,
    pub to_date: BackupDate,
    pub today: BackupDate,
}

#[derive(Debug)]
pub enum BackupOutcome {
    /// Start and end dates are equal.
    Skipped,
    Planned {
        range: DateRange,
    },
    Completed {
        range: DateRange,
        prefix: FilenamePrefix,
        parity: ParityReport,
    },
}

/// Runs one backup: resolve dates, validate dataset, equal-date guard,
/// ensure snapshot, export pipeline, parity, upload. Strictly in that order.
pub struct Orchestrator {
    pub runner: Arc<dyn CommandRunner>,
    pub remote: Box<dyn RemoteStore>,
    pub zfs: ZfsDataset,
    pub workdir: PathBuf,
    pub mode: PipelineMode,
    pub dry_run: bool,
    pub show_progress: bool,
}

impl Orchestrator {
    pub async fn run(
        &self,
        request: &BackupRequest,
        config: &DatasetConfig,
    ) -> Result<BackupOutcome> {
        let from = match request.from_date {
            Some(date) => date,
            None => {
                let date = self
                    .remote
                    .latest_range_end(&request.dataset)
                    .await
                    .context("Failed to resolve the start date from remote storage")?;
                info!(dataset = %request.dataset, from = %date, "Resolved start date from remote");
                date
            }
        };

        let entry = config.dataset(&request.dataset)?;

        let range = DateRange::new(from, request.to_date);
        if range.is_empty() {
            info!(dataset = %request.dataset, date = %from, "Range is empty, nothing to do");
            return Ok(BackupOutcome::Skipped);
        }
        if range.from > range.to {
            warn!(from = %range.from, to = %range.to, "Start date is after end date");
        }

        let prefix = FilenamePrefix::new(&request.dataset, &range);
        info!(
            dataset = %request.dataset,
            range = %range.folder_name(),
            prefix = %prefix,
            "Starting backup"
        );

        self.ensure_snapshot(request).await?;

        let pipeline = Pipeline::new(vec![
            self.zfs.send_command(&request.tag, &range),
            ARCHIVE_CIPHER.encrypt_command(&entry.pass),
            split_command(&prefix, &self.workdir),
        ]);

        if self.dry_run {
            println!("{}", pipeline);
            println!("{}", create_command(&format!("{}<NNNNNN>", prefix), &self.workdir));
            println!(
                "{}",
                self.remote.upload_command(&request.dataset, &range, &prefix, &self.workdir)
            );
            return Ok(BackupOutcome::Planned { range });
        }

        self.export(&pipeline).await?;

        let report = ParityManager::new(&self.workdir, self.runner.clone())
            .create(&prefix)
            .await
            .context("Parity generation failed")?;

        self.remote
            .upload(&request.dataset, &range, &prefix, &self.workdir)
            .await
            .context("Upload failed")?;

        Ok(BackupOutcome::Completed {
            range,
            prefix,
            parity: report,
        })
    }

    async fn ensure_snapshot(&self, request: &BackupRequest) -> Result<()> {
        if self.dry_run {
            let (_, cmd) = self
                .zfs
                .plan_snapshot(&request.tag, request.to_date, request.today)
                .await?;
            if let Some(cmd) = cmd {
                println!("{}", cmd);
            }
            return Ok(());
        }

        let outcome = self
            .zfs
            .ensure_snapshot(&request.tag, request.to_date, request.today)
            .await
            .context("Failed to ensure the end snapshot exists")?;
        match outcome {
            SnapshotOutcome::Created => {
                let snapshot = self.zfs.snapshot_ref(&request.tag, request.to_date);
                println!("Created snapshot {}", snapshot);
            }
            SnapshotOutcome::AlreadyExists => {
                let snapshot = self.zfs.snapshot_ref(&request.tag, request.to_date);
                info!(snapshot = %snapshot, "Snapshot already exists");
            }
            SnapshotOutcome::NotToday => {}
        }
        Ok(())
    }

    async fn export(&self, pipeline: &Pipeline) -> Result<()> {
        let pb = if self.show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message("Exporting, encrypting and splitting...");
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let status = self.runner.pipeline(pipeline).await;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        status?
            .check(self.mode)
            .context("Export pipeline failed; parity and upload were not run")?;
        Ok(())
    }
}
