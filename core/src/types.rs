use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Suffix appended to a chunk file name by the parity tool.
pub const PARITY_SUFFIX: &str = ".par2";

/// Default snapshot label.
pub const DEFAULT_TAG: &str = "offsite";

const DATE_FORMAT: &str = "%Y%m%d";

/// A calendar day, rendered as `YYYYMMDD`.
///
/// The zero-padded rendering means string order and chronological order
/// agree, which the remote and snapshot lookups rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupDate(NaiveDate);

impl BackupDate {
    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for BackupDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl FromStr for BackupDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidDate { value: s.to_string() };
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Self)
            .map_err(|_| invalid())
    }
}

impl fmt::Display for BackupDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl Serialize for BackupDate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BackupDate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BackupDate::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// The incremental range exported by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: BackupDate,
    pub to: BackupDate,
}

impl DateRange {
    pub fn new(from: BackupDate, to: BackupDate) -> Self {
        Self { from, to }
    }

    /// Equal endpoints mean there is nothing to export.
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Remote folder name, `F{from}-T{to}`.
    pub fn folder_name(&self) -> String {
        format!("F{}-T{}", self.from, self.to)
    }
}

/// Label combined with a date to name a snapshot, `{tag}-{date}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotTag(String);

impl SnapshotTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn snapshot_name(&self, date: BackupDate) -> String {
        format!("{}-{}", self.0, date)
    }
}

impl Default for SnapshotTag {
    fn default() -> Self {
        Self::new(DEFAULT_TAG)
    }
}

impl fmt::Display for SnapshotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{dataset}-F{from}-T{to}-part-`: the split output prefix, and the
/// selector used later by parity generation and upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilenamePrefix(String);

impl FilenamePrefix {
    pub fn new(dataset: &str, range: &DateRange) -> Self {
        Self(format!("{}-{}-part-", dataset, range.folder_name()))
    }

    /// Wrap an arbitrary prefix, as passed to the standalone parity command.
    pub fn raw(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, filename: &str) -> bool {
        filename.starts_with(&self.0)
    }

    /// Glob accepted by the sync tool's `--include`.
    pub fn glob(&self) -> String {
        format!("{}*", self.0)
    }
}

impl fmt::Display for FilenamePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_parity_file(filename: &str) -> bool {
    filename.ends_with(PARITY_SUFFIX)
}

pub fn parity_file_name(chunk: &str) -> String {
    format!("{}{}", chunk, PARITY_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> BackupDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_date_parse_and_display() {
        let d = date("20220610");
        assert_eq!(d.to_string(), "20220610");
        assert_eq!(d.as_naive(), NaiveDate::from_ymd_opt(2022, 6, 10).unwrap());

        assert!("2022-06-10".parse::<BackupDate>().is_err());
        assert!("20221310".parse::<BackupDate>().is_err());
        assert!("2022061".parse::<BackupDate>().is_err());
        assert!("+2022061".parse::<BackupDate>().is_err());
    }

    #[test]
    fn test_date_order_matches_string_order() {
        assert!(date("20221215") < date("20230101"));
        assert!("20221215" < "20230101");
    }

    #[test]
    fn test_filename_prefix() {
        let range = DateRange::new(date("20230101"), date("20230201"));
        let prefix = FilenamePrefix::new("documents", &range);
        assert_eq!(prefix.as_str(), "documents-F20230101-T20230201-part-");
        assert_eq!(prefix.glob(), "documents-F20230101-T20230201-part-*");
        assert!(prefix.matches("documents-F20230101-T20230201-part-000000.par2"));
        assert!(!prefix.matches("documents-F20230101-T20230301-part-000000"));

        // Same inputs, same prefix.
        assert_eq!(prefix, FilenamePrefix::new("documents", &range));
    }

    #[test]
    fn test_range_and_tag() {
        let range = DateRange::new(date("20230101"), date("20230101"));
        assert!(range.is_empty());
        assert_eq!(range.folder_name(), "F20230101-T20230101");

        let tag = SnapshotTag::default();
        assert_eq!(tag.snapshot_name(date("20230101")), "offsite-20230101");
    }

    #[test]
    fn test_parity_names() {
        assert_eq!(parity_file_name("a-part-000000"), "a-part-000000.par2");
        assert!(is_parity_file("a-part-000000.par2"));
        assert!(!is_parity_file("a-part-000000"));
    }
}
