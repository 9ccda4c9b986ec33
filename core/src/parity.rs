//! Redundancy files for chunk files, via the external `par2` tools.
//!
//! Both passes are fail-fast: the first non-zero exit stops iteration and is
//! returned as [`Error::ParityFailed`]. Whether that ends the process is up
//! to the caller.

use crate::chunker::list_prefixed;
use crate::command::CommandSpec;
use crate::runner::CommandRunner;
use crate::types::{is_parity_file, parity_file_name, FilenamePrefix};
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const CREATE_PROGRAM: &str = "par2create";
pub const VERIFY_PROGRAM: &str = "par2verify";

/// Recovery data as a percentage of the input.
pub const REDUNDANCY_PERCENT: u32 = 5;
pub const RECOVERY_FILE_COUNT: u32 = 1;
pub const MEMORY_LIMIT_MB: u32 = 3000;

pub fn create_command(filename: &str, dir: &Path) -> CommandSpec {
    CommandSpec::new(CREATE_PROGRAM)
        .arg(format!("-r{}", REDUNDANCY_PERCENT))
        .arg(format!("-n{}", RECOVERY_FILE_COUNT))
        .arg(format!("-m{}", MEMORY_LIMIT_MB))
        .arg("-q")
        .arg(filename)
        .current_dir(dir)
}

pub fn verify_command(filename: &str, dir: &Path) -> CommandSpec {
    CommandSpec::new(VERIFY_PROGRAM).arg(filename).current_dir(dir)
}

/// Files touched by a parity pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParityReport {
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
}

/// One planned tool invocation and the file it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityTask {
    pub file: String,
    pub command: CommandSpec,
}

pub struct ParityManager {
    dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ParityManager {
    pub fn new<P: AsRef<Path>>(dir: P, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            runner,
        }
    }

    /// Chunk files under `prefix` that still need a parity file, plus the
    /// chunk files skipped because theirs already exists.
    pub async fn plan_create(
        &self,
        prefix: &FilenamePrefix,
    ) -> Result<(Vec<ParityTask>, Vec<String>)> {
        let files = list_prefixed(&self.dir, prefix).await?;
        let present: HashSet<&str> = files.iter().map(String::as_str).collect();

        let mut tasks = Vec::new();
        let mut skipped = Vec::new();
        for file in files.iter().filter(|file| !is_parity_file(file)) {
            if present.contains(parity_file_name(file).as_str()) {
                skipped.push(file.clone());
                continue;
            }
            tasks.push(ParityTask {
                file: file.clone(),
                command: create_command(file, &self.dir),
            });
        }
        Ok((tasks, skipped))
    }

    /// Every parity file under `prefix`.
    pub async fn plan_verify(&self, prefix: &FilenamePrefix) -> Result<Vec<ParityTask>> {
        Ok(list_prefixed(&self.dir, prefix)
            .await?
            .into_iter()
            .filter(|file| is_parity_file(file))
            .map(|file| ParityTask {
                command: verify_command(&file, &self.dir),
                file,
            })
            .collect())
    }

    pub async fn create(&self, prefix: &FilenamePrefix) -> Result<ParityReport> {
        let (tasks, skipped) = self.plan_create(prefix).await?;
        for file in &skipped {
            debug!(file = %file, "Parity already present, skipping");
        }
        let pending = tasks.len();
        info!(prefix = %prefix, pending, skipped = skipped.len(), "Generating parity files");

        let processed = self
            .run_all(tasks, "Something went wrong generating a parity file")
            .await?;
        Ok(ParityReport { processed, skipped })
    }

    pub async fn verify(&self, prefix: &FilenamePrefix) -> Result<ParityReport> {
        let tasks = self.plan_verify(prefix).await?;
        info!(prefix = %prefix, files = tasks.len(), "Verifying parity files");

        let processed = self.run_all(tasks, "Something went wrong verifying a file").await?;
        Ok(ParityReport {
            processed,
            skipped: Vec::new(),
        })
    }

    async fn run_all(&self, tasks: Vec<ParityTask>, failure: &str) -> Result<Vec<String>> {
        let mut processed = Vec::with_capacity(tasks.len());
        for task in tasks {
            let status = self.runner.status(&task.command).await?;
            if !status.is_success() {
                error!(file = %task.file, code = status.code(), "{}", failure);
                return Err(Error::ParityFailed {
                    file: task.file,
                    code: status.code(),
                });
            }
            debug!(file = %task.file, "Parity pass ok");
            processed.push(task.file);
        }
        Ok(processed)
    }
}
