//! Atomic JSON snapshots.
//!
//! Every durable JSON file in the profile is rewritten with the same
//! discipline: serialize, write to `<path>.tmp`, then rename over the
//! target. A crash mid-write leaves either the old file or the new one,
//! never a torn half.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use perch_domain::{Error, Result};

/// Atomically write `value` as pretty JSON to `path`.
///
/// Parent directories are created as needed. The in-memory caller state
/// must only be updated after this returns `Ok`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a JSON file, returning `None` when it does not exist.
///
/// A file that exists but fails to parse is an error: silently starting
/// from scratch would discard durable state.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| Error::SchemaInvalid(format!("{}: {e}", path.display())))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let value = Sample { name: "perch".into(), count: 3 };

        save_json(&path, &value).unwrap();
        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = load_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let result: Result<Option<Sample>> = load_json(&path);
        assert!(matches!(result, Err(Error::SchemaInvalid(_))));
    }

    #[test]
    fn save_replaces_without_leaving_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_json(&path, &Sample { name: "a".into(), count: 1 }).unwrap();
        save_json(&path, &Sample { name: "b".into(), count: 2 }).unwrap();

        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded.unwrap().name, "b");
        assert!(!path.with_extension("tmp").exists());
    }
}
