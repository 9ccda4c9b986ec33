use crate::backend::RemoteStore;
use async_trait::async_trait;
use offsite_core::{
    BackupDate, CommandRunner, CommandSpec, DateRange, Error, FilenamePrefix, Result,
};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Storage class for uploaded chunks.
pub const STORAGE_CLASS: &str = "DEEP_ARCHIVE";

static RANGE_FOLDER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"PRE\sF(\d+)-T(\d+)/"));

/// S3 through the `aws` command line client.
pub struct AwsCliBackend {
    aws_cli: String,
    bucket: String,
    runner: Arc<dyn CommandRunner>,
}

impl AwsCliBackend {
    pub fn new(
        aws_cli: impl Into<String>,
        bucket: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let bucket: String = bucket.into();
        let bucket = bucket.trim_start_matches("s3://").trim_end_matches('/').to_string();
        Self {
            aws_cli: aws_cli.into(),
            bucket,
            runner,
        }
    }

    pub fn list_command(&self, dataset: &str) -> CommandSpec {
        CommandSpec::new(&self.aws_cli)
            .args(["s3", "ls"])
            .arg(self.incrementals_path(dataset))
    }

    fn range_uri(&self, dataset: &str, range: &DateRange) -> String {
        format!("s3://{}/{}/incrementals/{}", self.bucket, dataset, range.folder_name())
    }
}

/// Ranges named by the `PRE F<digits>-T<digits>/` lines of an `aws s3 ls`
/// listing. Lines whose digits are not a valid date are ignored.
pub fn parse_listing(listing: &str) -> Result<Vec<DateRange>> {
    let folder = (*RANGE_FOLDER).as_ref().map_err(|e| Error::Other(e.to_string()))?;
    let mut ranges = Vec::new();
    for line in listing.lines() {
        let Some(caps) = folder.captures(line) else {
            continue;
        };
        match (caps[1].parse::<BackupDate>(), caps[2].parse::<BackupDate>()) {
            (Ok(from), Ok(to)) => ranges.push(DateRange::new(from, to)),
            _ => warn!(line = line.trim(), "Ignoring malformed range folder"),
        }
    }
    Ok(ranges)
}

#[async_trait]
impl RemoteStore for AwsCliBackend {
    async fn list_ranges(&self, dataset: &str) -> Result<Vec<DateRange>> {
        let cmd = self.list_command(dataset);
        let output = self.runner.output(&cmd).await?;
        output.status.check(&cmd.program)?;

        let ranges = parse_listing(&output.stdout)?;
        debug!(dataset, ranges = ranges.len(), "Listed remote incrementals");
        Ok(ranges)
    }

    fn upload_command(
        &self,
        dataset: &str,
        range: &DateRange,
        prefix: &FilenamePrefix,
        dir: &Path,
    ) -> CommandSpec {
        CommandSpec::new(&self.aws_cli)
            .args(["s3", "sync", "--exclude", "*", "--include"])
            .arg(prefix.glob())
            .arg(".")
            .arg(self.range_uri(dataset, range))
            .args(["--storage-class", STORAGE_CLASS])
            .current_dir(dir)
    }

    async fn upload(
        &self,
        dataset: &str,
        range: &DateRange,
        prefix: &FilenamePrefix,
        dir: &Path,
    ) -> Result<()> {
        let cmd = self.upload_command(dataset, range, prefix, dir);
        info!(dataset, destination = %self.range_uri(dataset, range), "Uploading chunks");
        self.runner.status(&cmd).await?.check(&cmd.program)?;
        info!(dataset, "Upload finished");
        Ok(())
    }

    fn incrementals_path(&self, dataset: &str) -> String {
        format!("{}/{}/incrementals/", self.bucket, dataset)
    }
}
