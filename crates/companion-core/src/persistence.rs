//! Write-then-replace JSON persistence helpers.
//!
//! Every state file owned by this crate is written whole to a temp file next
//! to its destination, then renamed into place. Readers that hit a missing or
//! corrupt file fall back to `Default::default()` rather than erroring —
//! components resume from a clean slate instead of refusing to start.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// Serializes `value` and atomically replaces the file at `path`.
///
/// Failures are logged and swallowed: persistence is best-effort and must
/// never prevent the caller's in-memory state from being authoritative.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) {
    let result = (|| -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist state, continuing with in-memory copy");
    }
}

/// Loads JSON state from `path`, falling back to `T::default()` if the file
/// is missing, unreadable, or fails to parse.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt state file, resetting to defaults");
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read state file, resetting to defaults");
            T::default()
        }
    }
}

/// Appends one `YYYY-MM-DD HH:MM:SS | <text>` line to an append-only log file.
pub fn append_log_line(path: &Path, text: &str) {
    use std::io::Write;

    let result = (|| -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "{} | {}", ts, text)
    })();

    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to append log line");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Sample {
        n: u32,
        s: String,
    }

    #[test]
    fn round_trips_through_atomic_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        let value = Sample { n: 7, s: "hi".into() };
        save_json_atomic(&path, &value);

        let loaded: Sample = load_json_or_default(&path);
        assert_eq!(loaded, value);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let loaded: Sample = load_json_or_default(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn corrupt_file_yields_default_instead_of_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let loaded: Sample = load_json_or_default(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn appends_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.log");

        append_log_line(&path, "first thought");
        append_log_line(&path, "second thought");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("| first thought"));
        assert!(lines[1].ends_with("| second thought"));
    }
}
