use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid date '{value}': expected YYYYMMDD")]
    InvalidDate { value: String },

    #[error("dataset \"{dataset}\" does not exist in the config file.")]
    DatasetNotFound { dataset: String },

    #[error("No incremental ranges found under {path}")]
    NoRemoteIncrementals { path: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}")]
    ToolFailed { program: String, code: i32 },

    #[error("Pipeline stage {stage} ({program}) exited with code {code}")]
    PipelineFailed { stage: usize, program: String, code: i32 },

    #[error("Parity operation failed on {file} with code {code}")]
    ParityFailed { file: String, code: i32 },

    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for this error. External tool failures keep the
    /// tool's own code, everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ToolFailed { code, .. }
            | Error::PipelineFailed { code, .. }
            | Error::ParityFailed { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
