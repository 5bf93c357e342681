use std::{fs, fs::OpenOptions, io::Write, path::Path};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        Ok(value)
    } else {
        let value = initializer();
        save_json(path, &value)?;
        Ok(value)
    }
}

/// Write a value to disk as pretty-printed JSON, creating parent directories as needed.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Append a value as one JSON line to a log file, creating the file if missing.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log at {}", path.display()))?;
    let line = serde_json::to_string(value)?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        seed: u64,
        label: String,
    }

    #[test]
    fn load_or_init_creates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let created: Sample = load_or_init(&path, || Sample {
            seed: 7,
            label: "fresh".into(),
        })
        .unwrap();
        assert_eq!(created.seed, 7);
        assert!(path.exists());

        // A second load must read the file, not re-run the initializer.
        let reloaded: Sample = load_or_init(&path, || Sample {
            seed: 99,
            label: "ignored".into(),
        })
        .unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn load_or_init_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let result: Result<Sample> = load_or_init(&path, || Sample {
            seed: 1,
            label: "unused".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn append_jsonl_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trials.jsonl");

        append_jsonl(
            &path,
            &Sample {
                seed: 1,
                label: "a".into(),
            },
        )
        .unwrap();
        append_jsonl(
            &path,
            &Sample {
                seed: 2,
                label: "b".into(),
            },
        )
        .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let rows: Vec<Sample> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].seed, 2);
    }
}
