pub mod zfs;

pub use zfs::{SnapshotOutcome, ZfsDataset};
