use crate::command::{CommandOutput, CommandSpec, CommandStatus, Pipeline, PipelineStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Executes [`CommandSpec`]s and [`Pipeline`]s.
///
/// Everything that talks to an external tool goes through this trait, so the
/// orchestration can be exercised against a scripted runner.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with inherited stdio and return the exit status.
    async fn status(&self, cmd: &CommandSpec) -> Result<CommandStatus>;

    /// Run to completion capturing stdout.
    async fn output(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Start every stage, wait for all of them and report each status.
    async fn pipeline(&self, pipeline: &Pipeline) -> Result<PipelineStatus>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn(spec: &CommandSpec, cmd: &mut Command) -> Result<Child> {
        cmd.spawn().map_err(|source| Error::Spawn {
            program: spec.program.clone(),
            source,
        })
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn status(&self, spec: &CommandSpec) -> Result<CommandStatus> {
        info!(command = %spec, "Running");
        let mut child = Self::spawn(spec, &mut Self::command(spec))?;
        let status = CommandStatus::from(child.wait().await?);
        debug!(program = %spec.program, code = status.code(), "Finished");
        Ok(status)
    }

    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Querying");
        let mut cmd = Self::command(spec);
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
        let child = Self::spawn(spec, &mut cmd)?;
        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: CommandStatus::from(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn pipeline(&self, pipeline: &Pipeline) -> Result<PipelineStatus> {
        if pipeline.stages.is_empty() {
            return Err(Error::Other("Pipeline has no stages".to_string()));
        }
        info!(pipeline = %pipeline, "Starting pipeline");

        let last = pipeline.stages.len() - 1;
        let mut children: Vec<(String, Child)> = Vec::with_capacity(pipeline.stages.len());
        let mut upstream: Option<Stdio> = None;

        for (i, spec) in pipeline.stages.iter().enumerate() {
            let mut cmd = Self::command(spec);
            cmd.kill_on_drop(true);
            if let Some(stdin) = upstream.take() {
                cmd.stdin(stdin);
            }
            if i < last {
                cmd.stdout(Stdio::piped());
            } else if let Some(path) = &pipeline.output {
                cmd.stdout(Stdio::from(std::fs::File::create(path)?));
            }

            let mut child = Self::spawn(spec, &mut cmd)?;
            if i < last {
                let stdout = child.stdout.take().ok_or_else(|| {
                    Error::Other(format!("No stdout captured for {}", spec.program))
                })?;
                upstream = Some(stdout.try_into()?);
            }
            children.push((spec.program.clone(), child));
        }

        // Every stage is waited on so none is left running when an upstream
        // one dies early.
        let mut stages = Vec::with_capacity(children.len());
        for (i, (program, mut child)) in children.into_iter().enumerate() {
            let status = CommandStatus::from(child.wait().await?);
            debug!(stage = i, program = %program, code = status.code(), "Pipeline stage exited");
            stages.push((program, status));
        }
        Ok(PipelineStatus { stages })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::PipelineMode;

    #[tokio::test]
    async fn test_output_and_status() {
        let runner = SystemRunner::new();
        let out = runner
            .output(&CommandSpec::new("sh").args(["-c", "echo hello"]))
            .await
            .unwrap();
        assert!(out.status.is_success());
        assert_eq!(out.stdout.trim(), "hello");

        let status = runner
            .status(&CommandSpec::new("sh").args(["-c", "exit 7"]))
            .await
            .unwrap();
        assert_eq!(status.code(), 7);
    }

    #[tokio::test]
    async fn test_signal_maps_to_shell_exit_code() {
        let status = SystemRunner::new()
            .status(&CommandSpec::new("sh").args(["-c", "kill -9 $$"]))
            .await
            .unwrap();
        assert_eq!(status.code(), 137);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = SystemRunner::new();
        let err = runner
            .status(&CommandSpec::new("definitely-not-a-real-binary-offsite"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_pipeline_streams_between_stages() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let pipeline = Pipeline::new(vec![
            CommandSpec::new("printf").arg("b\\na\\nc\\n"),
            CommandSpec::new("sort"),
            CommandSpec::new("head").args(["-n", "2"]),
        ])
        .with_output(&out);

        let status = SystemRunner::new().pipeline(&pipeline).await.unwrap();
        assert_eq!(status.stages.len(), 3);
        assert!(status.check(PipelineMode::Strict).is_ok());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nb\n");
    }

    #[tokio::test]
    async fn test_pipeline_reports_upstream_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(vec![
            CommandSpec::new("sh").args(["-c", "exit 3"]),
            CommandSpec::new("cat"),
        ])
        .with_output(dir.path().join("out"));

        let status = SystemRunner::new().pipeline(&pipeline).await.unwrap();
        let (stage, program, code) = status.first_failure().unwrap();
        assert_eq!((stage, program, code.code()), (0, "sh", 3));
        assert!(status.check(PipelineMode::Strict).is_err());
        assert!(status.check(PipelineMode::Lenient).is_ok());
    }

    #[tokio::test]
    async fn test_pipeline_blames_reader_not_broken_pipe_writer() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(vec![
            CommandSpec::new("yes"),
            CommandSpec::new("sh").args(["-c", "head -c 10 >/dev/null; exit 5"]),
        ])
        .with_output(dir.path().join("out"));

        let status = SystemRunner::new().pipeline(&pipeline).await.unwrap();
        assert_eq!(status.stages[0].1.code(), crate::command::SIGPIPE_EXIT);

        let err = status.check(PipelineMode::Strict).unwrap_err();
        assert!(matches!(err, Error::PipelineFailed { stage: 1, code: 5, .. }));
        assert_eq!(err.exit_code(), 5);
    }
}
