// src/workspace.rs
//! Process-wide workspace state (last open figures, recent files), injected
//! into the composer and auto-saver instead of living in a global.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::persistence::write_atomic;

pub const AUTOSAVE_DIR_NAME: &str = "autosave";
const WORKSPACE_FILE_NAME: &str = "workspace.json";
const MAX_RECENT_FILES: usize = 10;

pub trait WorkspaceContext: Send + Sync {
    /// Root directory holding workspace files and the auto-save directory.
    fn root(&self) -> &Path;

    fn autosave_dir(&self) -> PathBuf {
        self.root().join(AUTOSAVE_DIR_NAME)
    }

    /// Figures that were open when the workspace was last recorded.
    fn last_open_figures(&self) -> Vec<PathBuf>;

    fn most_recent_file(&self) -> Option<PathBuf>;

    fn set_last_open_figures(&self, paths: Vec<PathBuf>);

    fn add_recent_file(&self, path: &Path);

    /// Persist whatever has been recorded so far.
    fn flush(&self) -> std::io::Result<()>;
}

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
struct WorkspaceState {
    #[serde(default)]
    open_figures: Vec<PathBuf>,
    #[serde(default)]
    recent_files: Vec<PathBuf>,
}

/// Workspace backed by `workspace.json` under a root directory.
pub struct FileWorkspace {
    root: PathBuf,
    state: Mutex<WorkspaceState>,
}

impl FileWorkspace {
    /// Loads `workspace.json` from `root`; an absent or unreadable file
    /// starts an empty workspace.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let state = fs::read_to_string(root.join(WORKSPACE_FILE_NAME))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Ok(Self { root, state: Mutex::new(state) })
    }

    /// Platform data directory, falling back to `./.figcomp`.
    pub fn default_root() -> PathBuf {
        ProjectDirs::from("", "", "figcomp")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".figcomp"))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut WorkspaceState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

impl WorkspaceContext for FileWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn last_open_figures(&self) -> Vec<PathBuf> {
        self.with_state(|s| s.open_figures.clone())
    }

    fn most_recent_file(&self) -> Option<PathBuf> {
        self.with_state(|s| s.recent_files.first().cloned())
    }

    fn set_last_open_figures(&self, paths: Vec<PathBuf>) {
        self.with_state(|s| s.open_figures = paths);
    }

    fn add_recent_file(&self, path: &Path) {
        self.with_state(|s| {
            s.recent_files.retain(|p| p != path);
            s.recent_files.insert(0, path.to_path_buf());
            s.recent_files.truncate(MAX_RECENT_FILES);
        });
    }

    fn flush(&self) -> std::io::Result<()> {
        let raw = self.with_state(|s| serde_json::to_string_pretty(s))?;
        write_atomic(&self.root.join(WORKSPACE_FILE_NAME), raw.as_bytes())
    }
}
