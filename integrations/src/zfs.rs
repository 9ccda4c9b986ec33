//! ZFS snapshot integration.
//!
//! Snapshots are named `{pool}/{dataset}@{tag}-{YYYYMMDD}`. Creation is
//! limited to today's date and is skipped when the newest tagged snapshot is
//! already today's, so repeated runs on one day never double-snapshot.

use offsite_core::{BackupDate, CommandRunner, CommandSpec, DateRange, Result, SnapshotTag};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

pub const ZFS_PROGRAM: &str = "zfs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The requested date is not today; snapshots are never made for other days.
    NotToday,
    AlreadyExists,
    Created,
}

pub struct ZfsDataset {
    pool: String,
    dataset: String,
    runner: Arc<dyn CommandRunner>,
}

impl ZfsDataset {
    pub fn new(
        pool: impl Into<String>,
        dataset: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            pool: pool.into(),
            dataset: dataset.into(),
            runner,
        }
    }

    /// `pool/dataset`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.pool, self.dataset)
    }

    pub fn snapshot_ref(&self, tag: &SnapshotTag, date: BackupDate) -> String {
        format!("{}@{}", self.full_name(), tag.snapshot_name(date))
    }

    pub fn list_command(&self) -> CommandSpec {
        CommandSpec::new(ZFS_PROGRAM)
            .arg("list")
            .arg(self.full_name())
            .args(["-t", "snapshot"])
    }

    pub fn snapshot_command(&self, tag: &SnapshotTag, date: BackupDate) -> CommandSpec {
        CommandSpec::new(ZFS_PROGRAM)
            .arg("snapshot")
            .arg(self.snapshot_ref(tag, date))
    }

    /// Incremental stream of every snapshot between the range endpoints.
    pub fn send_command(&self, tag: &SnapshotTag, range: &DateRange) -> CommandSpec {
        CommandSpec::new(ZFS_PROGRAM)
            .args(["send", "-I"])
            .arg(self.snapshot_ref(tag, range.from))
            .arg(self.snapshot_ref(tag, range.to))
    }

    pub fn receive_command(&self) -> CommandSpec {
        CommandSpec::new(ZFS_PROGRAM).arg("receive").arg(self.full_name())
    }

    /// Dates of the `{tag}-<digits>` snapshots found in a `zfs list` output.
    pub fn parse_snapshot_dates(
        &self,
        tag: &SnapshotTag,
        listing: &str,
    ) -> Result<Vec<BackupDate>> {
        let pattern = format!(
            r"{}@{}-(\d+)",
            regex::escape(&self.full_name()),
            regex::escape(tag.as_str())
        );
        let re = Regex::new(&pattern).map_err(|e| offsite_core::Error::Other(e.to_string()))?;

        let mut dates: Vec<BackupDate> = listing
            .lines()
            .filter_map(|line| re.captures(line))
            .filter_map(|caps| caps[1].parse().ok())
            .collect();
        dates.sort();
        Ok(dates)
    }

    pub async fn latest_snapshot(&self, tag: &SnapshotTag) -> Result<Option<BackupDate>> {
        let cmd = self.list_command();
        let output = self.runner.output(&cmd).await?;
        output.status.check(&cmd.program)?;

        let latest = self.parse_snapshot_dates(tag, &output.stdout)?.pop();
        debug!(
            dataset = %self.full_name(),
            tag = %tag,
            latest = ?latest.map(|d| d.to_string()),
            "Latest snapshot"
        );
        Ok(latest)
    }

    /// The snapshot command that [`ensure_snapshot`](Self::ensure_snapshot)
    /// would run, if any.
    pub async fn plan_snapshot(
        &self,
        tag: &SnapshotTag,
        date: BackupDate,
        today: BackupDate,
    ) -> Result<(SnapshotOutcome, Option<CommandSpec>)> {
        if date != today {
            return Ok((SnapshotOutcome::NotToday, None));
        }
        if self.latest_snapshot(tag).await? == Some(date) {
            return Ok((SnapshotOutcome::AlreadyExists, None));
        }
        Ok((SnapshotOutcome::Created, Some(self.snapshot_command(tag, date))))
    }

    pub async fn ensure_snapshot(
        &self,
        tag: &SnapshotTag,
        date: BackupDate,
        today: BackupDate,
    ) -> Result<SnapshotOutcome> {
        let (outcome, cmd) = self.plan_snapshot(tag, date, today).await?;
        match cmd {
            Some(cmd) => {
                self.runner.status(&cmd).await?.check(&cmd.program)?;
                info!(snapshot = %self.snapshot_ref(tag, date), "Created snapshot");
            }
            None => debug!(?outcome, "No snapshot needed"),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsite_core::testing::ScriptedRunner;
    use offsite_core::CommandStatus;

    const LISTING: &str = "\
NAME                          USED  AVAIL     REFER  MOUNTPOINT
tank1/documents@offsite-20230101  1.2M      -     10G  -
tank1/documents@offsite-20230301  800K      -     10G  -
tank1/documents@manual-20230401   100K      -     10G  -
tank1/documents@offsite-20230201  900K      -     10G  -
";

    fn date(s: &str) -> BackupDate {
        s.parse().unwrap()
    }

    fn dataset(runner: Arc<ScriptedRunner>) -> ZfsDataset {
        ZfsDataset::new("tank1", "documents", runner)
    }

    #[test]
    fn test_commands() {
        let zfs = dataset(Arc::new(ScriptedRunner::new()));
        let tag = SnapshotTag::default();
        let range = DateRange::new(date("20230101"), date("20230201"));

        assert_eq!(
            zfs.list_command().argv(),
            vec!["zfs", "list", "tank1/documents", "-t", "snapshot"]
        );
        assert_eq!(
            zfs.snapshot_command(&tag, date("20230201")).argv(),
            vec!["zfs", "snapshot", "tank1/documents@offsite-20230201"]
        );
        assert_eq!(
            zfs.send_command(&tag, &range).argv(),
            vec![
                "zfs",
                "send",
                "-I",
                "tank1/documents@offsite-20230101",
                "tank1/documents@offsite-20230201",
            ]
        );
        assert_eq!(zfs.receive_command().argv(), vec!["zfs", "receive", "tank1/documents"]);
    }

    #[test]
    fn test_parse_snapshot_dates_filters_by_tag() {
        let zfs = dataset(Arc::new(ScriptedRunner::new()));
        let dates = zfs.parse_snapshot_dates(&SnapshotTag::default(), LISTING).unwrap();
        assert_eq!(dates, vec![date("20230101"), date("20230201"), date("20230301")]);

        let manual = zfs.parse_snapshot_dates(&SnapshotTag::new("manual"), LISTING).unwrap();
        assert_eq!(manual, vec![date("20230401")]);
    }

    #[tokio::test]
    async fn test_ensure_snapshot_only_for_today() {
        let runner = Arc::new(ScriptedRunner::new());
        let zfs = dataset(runner.clone());

        let outcome = zfs
            .ensure_snapshot(&SnapshotTag::default(), date("20230301"), date("20230302"))
            .await
            .unwrap();
        assert_eq!(outcome, SnapshotOutcome::NotToday);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_snapshot_creates_when_missing() {
        let runner = Arc::new(ScriptedRunner::new().respond_stdout(ZFS_PROGRAM, LISTING));
        let zfs = dataset(runner.clone());

        let outcome = zfs
            .ensure_snapshot(&SnapshotTag::default(), date("20230302"), date("20230302"))
            .await
            .unwrap();
        assert_eq!(outcome, SnapshotOutcome::Created);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].argv(), vec!["zfs", "snapshot", "tank1/documents@offsite-20230302"]);
    }

    #[tokio::test]
    async fn test_ensure_snapshot_is_idempotent_per_day() {
        let after_first = format!("{}tank1/documents@offsite-20230302  0B  -  10G  -\n", LISTING);
        let runner = Arc::new(
            ScriptedRunner::new()
                .respond_stdout(ZFS_PROGRAM, LISTING)
                .respond(ZFS_PROGRAM, CommandStatus::success())
                .respond_stdout(ZFS_PROGRAM, after_first),
        );
        let zfs = dataset(runner.clone());
        let tag = SnapshotTag::default();
        let today = date("20230302");

        let first = zfs.ensure_snapshot(&tag, today, today).await.unwrap();
        let second = zfs.ensure_snapshot(&tag, today, today).await.unwrap();
        assert_eq!(first, SnapshotOutcome::Created);
        assert_eq!(second, SnapshotOutcome::AlreadyExists);

        let snapshots = runner
            .calls()
            .iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("snapshot"))
            .count();
        assert_eq!(snapshots, 1);
    }

    #[tokio::test]
    async fn test_ensure_snapshot_with_no_tagged_snapshots() {
        let runner = Arc::new(
            ScriptedRunner::new().respond_stdout(ZFS_PROGRAM, "no datasets available\n"),
        );
        let zfs = dataset(runner.clone());

        let outcome = zfs
            .ensure_snapshot(&SnapshotTag::default(), date("20230302"), date("20230302"))
            .await
            .unwrap();
        assert_eq!(outcome, SnapshotOutcome::Created);
    }

    #[tokio::test]
    async fn test_snapshot_failure_propagates() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .respond_stdout(ZFS_PROGRAM, LISTING)
                .respond(ZFS_PROGRAM, CommandStatus::from_code(1)),
        );
        let zfs = dataset(runner);

        let err = zfs
            .ensure_snapshot(&SnapshotTag::default(), date("20230302"), date("20230302"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
