use crate::command::CommandSpec;
use crate::types::{is_parity_file, FilenamePrefix};
use crate::Result;
use std::path::Path;
use tokio::fs;

pub const SPLIT_PROGRAM: &str = "split";

/// Upper bound for one chunk file, in `split -b` notation (4 GiB).
pub const CHUNK_SIZE: &str = "4G";

pub const SUFFIX_LENGTH: usize = 6;

/// Splits stdin into `{prefix}{NNNNNN}` files inside `dir`.
pub fn split_command(prefix: &FilenamePrefix, dir: &Path) -> CommandSpec {
    CommandSpec::new(SPLIT_PROGRAM)
        .args(["-b", CHUNK_SIZE, "-d"])
        .arg(format!("--suffix-length={}", SUFFIX_LENGTH))
        .arg("-")
        .arg(prefix.as_str())
        .current_dir(dir)
}

/// Concatenates chunk files back into one stream, in the given order.
pub fn concat_command(chunks: &[String], dir: &Path) -> CommandSpec {
    CommandSpec::new("cat").args(chunks.iter().cloned()).current_dir(dir)
}

/// Regular files in `dir` whose name starts with `prefix`, sorted by name.
/// Symlinks count when they resolve to a regular file.
pub async fn list_prefixed(dir: &Path, prefix: &FilenamePrefix) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        match fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_file() => {}
            _ => continue,
        }
        if let Some(name) = entry.file_name().to_str() {
            if prefix.matches(name) {
                files.push(name.to_string());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Chunk files for `prefix`, excluding parity files and their numbered
/// `.volNN+MM.par2` companions.
pub async fn list_chunks(dir: &Path, prefix: &FilenamePrefix) -> Result<Vec<String>> {
    Ok(list_prefixed(dir, prefix)
        .await?
        .into_iter()
        .filter(|name| !is_parity_file(name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        let prefix = FilenamePrefix::raw("docs-F20230101-T20230201-part-");
        let cmd = split_command(&prefix, Path::new("/backup"));
        assert_eq!(
            cmd.argv(),
            vec![
                "split",
                "-b",
                "4G",
                "-d",
                "--suffix-length=6",
                "-",
                "docs-F20230101-T20230201-part-",
            ]
        );
        assert_eq!(cmd.current_dir.as_deref(), Some(Path::new("/backup")));
    }

    #[tokio::test]
    async fn test_list_prefixed_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "a-part-000001",
            "a-part-000000",
            "a-part-000000.par2",
            "a-part-000000.vol00+01.par2",
            "b-part-000000",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("a-part-dir")).unwrap();

        let prefix = FilenamePrefix::raw("a-part-");
        let all = list_prefixed(dir.path(), &prefix).await.unwrap();
        assert_eq!(
            all,
            vec![
                "a-part-000000",
                "a-part-000000.par2",
                "a-part-000000.vol00+01.par2",
                "a-part-000001",
            ]
        );

        let chunks = list_chunks(dir.path(), &prefix).await.unwrap();
        assert_eq!(chunks, vec!["a-part-000000", "a-part-000001"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_prefixed_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let target = elsewhere.path().join("stored-chunk");
        std::fs::write(&target, b"x").unwrap();

        std::os::unix::fs::symlink(&target, dir.path().join("a-part-000000")).unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), dir.path().join("a-part-linkdir")).unwrap();
        std::os::unix::fs::symlink(
            elsewhere.path().join("missing"),
            dir.path().join("a-part-dangling"),
        )
        .unwrap();

        let files = list_prefixed(dir.path(), &FilenamePrefix::raw("a-part-")).await.unwrap();
        assert_eq!(files, vec!["a-part-000000"]);
    }
}
