// src/autosave/state.rs
//! The auto-save state file: a flat JSON array alternating entry id and
//! original source path (`""` when the figure never had a file).
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde_json::Value;

use crate::error::AutosaveError;
use crate::persistence::write_atomic;

/// Entry id → original source path.
pub type StateMap = BTreeMap<u32, Option<PathBuf>>;

pub fn encode_state(entries: &StateMap) -> String {
    let flat: Vec<Value> = entries
        .iter()
        .flat_map(|(id, path)| {
            let path = path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            [Value::from(*id), Value::from(path)]
        })
        .collect();
    Value::Array(flat).to_string()
}

/// All-or-nothing: any malformed record rejects the whole list.
pub fn decode_state(raw: &str) -> Result<StateMap, AutosaveError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| AutosaveError::State(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(AutosaveError::State("expected a JSON array".into()));
    };
    if items.len() % 2 != 0 {
        return Err(AutosaveError::State(format!("odd record count {}", items.len())));
    }

    let mut out = StateMap::new();
    for pair in items.chunks_exact(2) {
        let id = pair[0]
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| AutosaveError::State(format!("bad entry id {}", pair[0])))?;
        let path = pair[1]
            .as_str()
            .ok_or_else(|| AutosaveError::State(format!("bad path for entry {id}")))?;
        let path = (!path.is_empty()).then(|| PathBuf::from(path));
        out.insert(id, path);
    }
    Ok(out)
}

/// Rewrites the state file. `false` means the caller should retry later.
pub fn write_state(file: &Path, entries: &StateMap) -> bool {
    match write_atomic(file, encode_state(entries).as_bytes()) {
        Ok(()) => true,
        Err(e) => {
            warn!("auto-save state write to {} failed: {e}", file.display());
            false
        }
    }
}

/// Reads the state file. Paths that no longer exist are cleared, as if
/// the figure never had a file.
pub fn read_state(file: &Path) -> Option<StateMap> {
    let raw = fs::read_to_string(file).ok()?;
    let mut entries = match decode_state(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("ignoring auto-save state {}: {e}", file.display());
            return None;
        }
    };
    for path in entries.values_mut() {
        if path.as_ref().is_some_and(|p| !p.exists()) {
            *path = None;
        }
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_clears_vanished_paths() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real.fyp");
        fs::write(&real, b"{}").unwrap();
        let state_file = dir.path().join("autosave.json");

        let mut entries = StateMap::new();
        entries.insert(1, Some(real.clone()));
        entries.insert(2, None);
        entries.insert(5, Some(dir.path().join("gone.fyp")));
        assert!(write_state(&state_file, &entries));

        let back = read_state(&state_file).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[&1], Some(real));
        assert_eq!(back[&2], None);
        assert_eq!(back[&5], None);
    }

    #[test]
    fn encodes_as_flat_alternating_array() {
        let mut entries = StateMap::new();
        entries.insert(3, Some(PathBuf::from("/figs/a.fyp")));
        entries.insert(4, None);
        assert_eq!(encode_state(&entries), r#"[3,"/figs/a.fyp",4,""]"#);
    }

    #[test]
    fn malformed_lists_are_rejected_whole() {
        assert!(decode_state(r#"[1,"/a.fyp",2]"#).is_err());
        assert!(decode_state(r#"["1","/a.fyp"]"#).is_err());
        assert!(decode_state(r#"[1,7]"#).is_err());
        assert!(decode_state(r#"{"1":"/a.fyp"}"#).is_err());
        assert!(decode_state("[-1,\"\"]").is_err());
        assert!(decode_state("[]").unwrap().is_empty());
    }

    #[test]
    fn unreadable_state_is_absent() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("autosave.json");
        assert!(read_state(&state_file).is_none());
        fs::write(&state_file, "[1,").unwrap();
        assert!(read_state(&state_file).is_none());
    }
}
