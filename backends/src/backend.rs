use async_trait::async_trait;
use offsite_core::{BackupDate, CommandSpec, DateRange, Error, FilenamePrefix, Result};
use std::path::Path;

/// Cold storage holding one folder per uploaded incremental range.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every `F{from}-T{to}` range already stored for `dataset`.
    async fn list_ranges(&self, dataset: &str) -> Result<Vec<DateRange>>;

    /// Command that copies the files matching `prefix` from `dir` into the
    /// folder for `range`.
    fn upload_command(
        &self,
        dataset: &str,
        range: &DateRange,
        prefix: &FilenamePrefix,
        dir: &Path,
    ) -> CommandSpec;

    async fn upload(
        &self,
        dataset: &str,
        range: &DateRange,
        prefix: &FilenamePrefix,
        dir: &Path,
    ) -> Result<()>;

    /// Location listed by [`list_ranges`](Self::list_ranges), for messages.
    fn incrementals_path(&self, dataset: &str) -> String;

    /// The newest range end, which is where the next run starts.
    async fn latest_range_end(&self, dataset: &str) -> Result<BackupDate> {
        self.list_ranges(dataset)
            .await?
            .into_iter()
            .map(|range| range.to)
            .max()
            .ok_or_else(|| Error::NoRemoteIncrementals {
                path: self.incrementals_path(dataset),
            })
    }
}
