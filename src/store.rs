//! Working-directory persistence: atomic `*_latest` writes plus timestamped
//! archive copies, per spec.md §6.
//!
//! Writes are atomic (temp file + rename), following the same pattern the
//! teacher's `checkpoint.rs::save` uses for its own JSON state files.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Owns the pipeline's shared working directory: `*_latest.json` artifacts
/// plus an `archive/` sibling of timestamped copies.
pub struct WorkingDir {
    root: PathBuf,
}

impl WorkingDir {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating working directory {}", root.display()))?;
        fs::create_dir_all(root.join("archive"))
            .with_context(|| format!("creating archive directory under {}", root.display()))?;
        Ok(WorkingDir { root })
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn archive_path(&self, stage: &str, kind: &str, timestamp: &str) -> PathBuf {
        self.root
            .join("archive")
            .join(format!("{stage}_{kind}_{timestamp}.json"))
    }

    /// Does the named `*_latest.json` artifact exist?
    pub fn exists(&self, filename: &str) -> bool {
        self.path(filename).exists()
    }

    /// Read and parse a JSON artifact from the working directory.
    pub fn read_json<T: serde::de::DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.path(filename);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {} as JSON", path.display()))?;
        Ok(Some(value))
    }

    /// Write a value to `<filename>` atomically (temp file + rename) and
    /// append a timestamped copy under `archive/`.
    pub fn write_latest_and_archive<T: Serialize>(
        &self,
        filename: &str,
        stage: &str,
        kind: &str,
        timestamp: &str,
        value: &T,
    ) -> Result<PathBuf> {
        let latest_path = self.path(filename);
        write_json_atomic(&latest_path, value)?;
        let archive_path = self.archive_path(stage, kind, timestamp);
        write_json_atomic(&archive_path, value)?;
        Ok(latest_path)
    }
}

/// Serialize `value` as indented UTF-8 JSON and write it atomically: write
/// to a `.tmp` sibling, then rename over the destination.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing value for {}", path.display()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Current UTC timestamp formatted as `YYYYMMDD_HHMMSS`, for archive
/// filenames. The only source of nondeterminism in the pipeline; it never
/// enters computed outputs.
pub fn timestamp_now() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDir::new(dir.path()).unwrap();
        let value = json!({"a": 1});
        wd.write_latest_and_archive("thing_latest.json", "thing", "output", "20260101_000000", &value)
            .unwrap();
        assert!(wd.exists("thing_latest.json"));
        let read_back: serde_json::Value = wd.read_json("thing_latest.json").unwrap().unwrap();
        assert_eq!(read_back, value);
        assert!(wd
            .archive_path("thing", "output", "20260101_000000")
            .exists());
    }

    #[test]
    fn missing_artifact_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDir::new(dir.path()).unwrap();
        let read_back: Option<serde_json::Value> = wd.read_json("nope_latest.json").unwrap();
        assert!(read_back.is_none());
    }
}
