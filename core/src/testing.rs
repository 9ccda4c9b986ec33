//! A [`CommandRunner`] that never spawns anything.
//!
//! Responses are queued per program name and consumed in order; once a
//! program's queue is empty it succeeds with empty stdout.

use crate::command::{CommandOutput, CommandSpec, CommandStatus, Pipeline, PipelineStatus};
use crate::runner::CommandRunner;
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Scripted {
    status: CommandStatus,
    stdout: String,
}

#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<CommandSpec>>,
    pipelines: Mutex<Vec<Pipeline>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, program: &str, status: CommandStatus) -> Self {
        self.push(program, status, String::new())
    }

    pub fn respond_stdout(self, program: &str, stdout: impl Into<String>) -> Self {
        self.push(program, CommandStatus::success(), stdout.into())
    }

    fn push(self, program: &str, status: CommandStatus, stdout: String) -> Self {
        lock(&self.responses)
            .entry(program.to_string())
            .or_default()
            .push_back(Scripted { status, stdout });
        self
    }

    /// Every command seen so far, pipeline stages included, in call order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    pub fn programs(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.program.clone()).collect()
    }

    pub fn pipelines(&self) -> Vec<Pipeline> {
        lock(&self.pipelines).clone()
    }

    fn next(&self, cmd: &CommandSpec) -> Scripted {
        lock(&self.calls).push(cmd.clone());
        lock(&self.responses)
            .get_mut(&cmd.program)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Scripted {
                status: CommandStatus::success(),
                stdout: String::new(),
            })
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn status(&self, cmd: &CommandSpec) -> Result<CommandStatus> {
        Ok(self.next(cmd).status)
    }

    async fn output(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let scripted = self.next(cmd);
        Ok(CommandOutput {
            status: scripted.status,
            stdout: scripted.stdout,
        })
    }

    async fn pipeline(&self, pipeline: &Pipeline) -> Result<PipelineStatus> {
        lock(&self.pipelines).push(pipeline.clone());
        let stages = pipeline
            .stages
            .iter()
            .map(|stage| (stage.program.clone(), self.next(stage).status))
            .collect();
        Ok(PipelineStatus { stages })
    }
}
