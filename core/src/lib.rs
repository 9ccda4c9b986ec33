pub mod chunker;
pub mod command;
pub mod config;
pub mod crypto;
pub mod error;
pub mod parity;
pub mod runner;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{
    CommandOutput, CommandSpec, CommandStatus, Pipeline, PipelineMode, PipelineStatus,
};
pub use config::{DatasetConfig, DatasetEntry};
pub use error::{Error, Result};
pub use parity::{ParityManager, ParityReport};
pub use runner::{CommandRunner, SystemRunner};
pub use types::*;
