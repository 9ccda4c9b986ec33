pub mod backup;
pub mod parity;
pub mod restore;

use offsite_core::{BackupDate, CommandRunner};
use std::path::PathBuf;
use std::sync::Arc;

/// Process-wide values resolved once in `main`.
pub struct Context {
    pub workdir: PathBuf,
    pub today: BackupDate,
    pub runner: Arc<dyn CommandRunner>,
    pub quiet: bool,
}
