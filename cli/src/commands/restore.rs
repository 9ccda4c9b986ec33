use anyhow::{anyhow, Context as _, Result};
use clap::{ArgGroup, Args};
use offsite_core::chunker::{concat_command, list_chunks};
use offsite_core::crypto::ARCHIVE_CIPHER;
use offsite_core::{
    BackupDate, CommandRunner, DatasetConfig, DateRange, FilenamePrefix, ParityManager, Pipeline,
    PipelineMode,
};
use offsite_integrations::ZfsDataset;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::Context;

#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["output", "pool"])))]
pub struct RestoreCommand {
    #[arg(long, help = "Name of zfs dataset the chunks were exported from")]
    dataset: String,

    #[arg(long, env = "OFFSITE_CONFIG", help = "Path to config file")]
    config: PathBuf,

    #[arg(long = "from_date", help = "Start date of the increment in \"YYYYMMDD\"")]
    from_date: BackupDate,

    #[arg(long = "to_date", help = "End date of the increment in \"YYYYMMDD\"")]
    to_date: BackupDate,

    #[arg(long, help = "Write the decrypted stream to this file")]
    output: Option<PathBuf>,

    #[arg(long, help = "Receive the decrypted stream into this zfs pool")]
    pool: Option<String>,

    #[arg(long, help = "Verify parity files before decrypting")]
    verify_parity: bool,
}

/// Where the decrypted stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    File(PathBuf),
    Receive { pool: String },
}

impl RestoreCommand {
    fn target(&self) -> Result<RestoreTarget> {
        match (&self.output, &self.pool) {
            (Some(path), None) => Ok(RestoreTarget::File(path.clone())),
            (None, Some(pool)) => Ok(RestoreTarget::Receive { pool: pool.clone() }),
            _ => Err(anyhow!("Exactly one of --output or --pool is required")),
        }
    }

    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let config = DatasetConfig::load(&self.config).await?;
        let entry = config.dataset(&self.dataset)?;
        let range = DateRange::new(self.from_date, self.to_date);

        let restored = restore(
            ctx.runner.clone(),
            &ctx.workdir,
            &self.dataset,
            &range,
            &entry.pass,
            &self.target()?,
            self.verify_parity,
        )
        .await?;

        println!("Restored {} chunks of {} {}", restored, self.dataset, range.folder_name());
        Ok(())
    }
}

/// Concatenates the range's chunks in suffix order and decrypts them into
/// `target`. Returns the number of chunks read.
pub async fn restore(
    runner: Arc<dyn CommandRunner>,
    workdir: &Path,
    dataset: &str,
    range: &DateRange,
    passphrase: &str,
    target: &RestoreTarget,
    verify_parity: bool,
) -> Result<usize> {
    let prefix = FilenamePrefix::new(dataset, range);
    let chunks = list_chunks(workdir, &prefix).await?;
    if chunks.is_empty() {
        return Err(anyhow!("No chunk files matching {}* in {}", prefix, workdir.display()));
    }
    info!(prefix = %prefix, chunks = chunks.len(), "Restoring increment");

    if verify_parity {
        ParityManager::new(workdir, runner.clone())
            .verify(&prefix)
            .await
            .context("Parity verification failed")?;
    }

    let mut stages = vec![
        concat_command(&chunks, workdir),
        ARCHIVE_CIPHER.decrypt_command(passphrase),
    ];
    let pipeline = match target {
        RestoreTarget::File(path) => Pipeline::new(stages).with_output(path),
        RestoreTarget::Receive { pool } => {
            stages.push(ZfsDataset::new(pool, dataset, runner.clone()).receive_command());
            Pipeline::new(stages)
        }
    };

    runner
        .pipeline(&pipeline)
        .await?
        .check(PipelineMode::Strict)
        .context("Restore pipeline failed")?;
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsite_core::testing::ScriptedRunner;
    use offsite_core::CommandStatus;

    fn range() -> DateRange {
        DateRange::new("20230101".parse().unwrap(), "20230201".parse().unwrap())
    }

    fn workdir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "docs-F20230101-T20230201-part-000001",
            "docs-F20230101-T20230201-part-000000",
            "docs-F20230101-T20230201-part-000000.par2",
            "docs-F20230101-T20230201-part-000001.par2",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_restore_into_zfs() {
        let dir = workdir();
        let runner = Arc::new(ScriptedRunner::new());

        let count = restore(
            runner.clone(),
            dir.path(),
            "docs",
            &range(),
            "hunter2",
            &RestoreTarget::Receive { pool: "tank2".to_string() },
            true,
        )
        .await
        .unwrap();
        assert_eq!(count, 2);

        assert_eq!(runner.programs(), vec!["par2verify", "par2verify", "cat", "openssl", "zfs"]);
        let pipeline = &runner.pipelines()[0];
        assert_eq!(
            pipeline.stages[0].args,
            vec!["docs-F20230101-T20230201-part-000000", "docs-F20230101-T20230201-part-000001"]
        );
        assert!(pipeline.stages[1].args.contains(&"-d".to_string()));
        assert_eq!(pipeline.stages[2].argv(), vec!["zfs", "receive", "tank2/docs"]);
        assert_eq!(pipeline.output, None);
    }

    #[tokio::test]
    async fn test_restore_to_file() {
        let dir = workdir();
        let runner = Arc::new(ScriptedRunner::new());
        let out = dir.path().join("stream.zfs");

        let target = RestoreTarget::File(out.clone());
        restore(runner.clone(), dir.path(), "docs", &range(), "hunter2", &target, false)
            .await
            .unwrap();

        assert_eq!(runner.programs(), vec!["cat", "openssl"]);
        assert_eq!(runner.pipelines()[0].output.as_deref(), Some(out.as_path()));
    }

    #[tokio::test]
    async fn test_restore_stops_on_parity_failure() {
        let dir = workdir();
        let runner =
            Arc::new(ScriptedRunner::new().respond("par2verify", CommandStatus::from_code(1)));

        let err = restore(
            runner.clone(),
            dir.path(),
            "docs",
            &range(),
            "hunter2",
            &RestoreTarget::File(dir.path().join("out")),
            true,
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<offsite_core::Error>().is_some());
        assert!(runner.pipelines().is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        let result = restore(
            runner,
            dir.path(),
            "docs",
            &range(),
            "hunter2",
            &RestoreTarget::File(dir.path().join("out")),
            false,
        )
        .await;
        assert!(result.is_err());
    }
}
