//! Typed descriptions of external tool invocations.
//!
//! Nothing here spawns a process. A [`CommandSpec`] is the argument list for
//! one tool, a [`Pipeline`] chains several of them stdout-to-stdin, and a
//! [`CommandRunner`](crate::runner::CommandRunner) turns either into running
//! processes.

use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

const REDACTED: &str = "***";

/// Exit code of a process killed by SIGPIPE after its reader went away.
pub const SIGPIPE_EXIT: i32 = 128 + 13;

#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Indices into `args` that must never be logged.
    secret_args: BTreeSet<usize>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret_args: BTreeSet::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.insert(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Full argv, program first. Secrets included.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Argv with secret arguments replaced, for logs and dry runs.
    pub fn redacted(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().enumerate().map(|(i, arg)| {
                if self.secret_args.contains(&i) { REDACTED } else { arg.as_str() }
            }))
            .collect()
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("argv", &self.redacted())
            .field("current_dir", &self.current_dir)
            .finish()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted().join(" "))
    }
}

/// Processes connected stdout to stdin, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<CommandSpec>,
    /// Where the last stage writes. Inherits our stdout when unset.
    pub output: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(stages: Vec<CommandSpec>) -> Self {
        Self { stages, output: None }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.stages.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(" | "))?;
        if let Some(output) = &self.output {
            write!(f, " > {}", output.display())?;
        }
        Ok(())
    }
}

/// Exit status of a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    code: i32,
}

impl CommandStatus {
    pub fn from_code(code: i32) -> Self {
        Self { code }
    }

    pub fn success() -> Self {
        Self { code: 0 }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// `Ok` on success, otherwise [`Error::ToolFailed`] for `program`.
    pub fn check(self, program: &str) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::ToolFailed {
                program: program.to_string(),
                code: self.code,
            })
        }
    }
}

impl From<std::process::ExitStatus> for CommandStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self { code: 128 + signal };
            }
        }
        Self { code: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
}

/// How a pipeline's per-stage exit statuses are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Any non-zero stage aborts the run.
    #[default]
    Strict,
    /// Non-zero stages are logged and the run continues.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub stages: Vec<(String, CommandStatus)>,
}

impl PipelineStatus {
    pub fn first_failure(&self) -> Option<(usize, &str, CommandStatus)> {
        self.stages
            .iter()
            .enumerate()
            .find(|(_, (_, status))| !status.is_success())
            .map(|(i, (program, status))| (i, program.as_str(), *status))
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &str, CommandStatus)> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, (_, status))| !status.is_success())
            .map(|(i, (program, status))| (i, program.as_str(), *status))
    }

    /// The stage to blame for a failed pipeline: the first failure that is
    /// not a SIGPIPE death, else the earliest failure.
    pub fn root_failure(&self) -> Option<(usize, &str, CommandStatus)> {
        self.failures()
            .find(|(_, _, status)| status.code() != SIGPIPE_EXIT)
            .or_else(|| self.first_failure())
    }

    /// Apply `mode`: strict turns the failed stage into an error, lenient
    /// only reports.
    pub fn check(&self, mode: PipelineMode) -> Result<()> {
        match (mode, self.root_failure()) {
            (PipelineMode::Strict, Some((stage, program, status))) => {
                for (other, name, other_status) in self.failures().filter(|(i, _, _)| *i != stage) {
                    let code = other_status.code();
                    tracing::debug!(stage = other, program = name, code, "Stage also failed");
                }
                Err(Error::PipelineFailed {
                    stage,
                    program: program.to_string(),
                    code: status.code(),
                })
            }
            (PipelineMode::Lenient, Some(_)) => {
                for (stage, program, status) in self.failures() {
                    let code = status.code();
                    tracing::warn!(stage, program, code, "Pipeline stage failed, continuing");
                }
                Ok(())
            }
            (_, None) => Ok(()),
        }
    }
}
