// src/tab.rs
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::figure::Figure;
use crate::persistence::file_timestamp;

/// Loading and syncing are exclusive; while either is in flight the figure
/// is neither backed up nor reloaded again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TabState {
    /// First population from a file.
    Loading,
    Ready,
    /// Reloading because the file changed on disk.
    Syncing,
}

/// One open figure and its bookkeeping.
#[derive(Debug)]
pub struct FigureTab {
    key: u64,
    figure: Figure,
    source: Option<PathBuf>,
    source_stamp: Option<SystemTime>,
    modified: bool,
    state: TabState,
    autosave_id: Option<u32>,
}

impl FigureTab {
    /// A ready tab. `source` must already hold `figure` if given.
    pub fn new(key: u64, figure: Figure, source: Option<PathBuf>) -> Self {
        let source_stamp = source.as_deref().and_then(file_timestamp);
        Self {
            key,
            modified: figure.is_modified(),
            figure,
            source,
            source_stamp,
            state: TabState::Ready,
            autosave_id: None,
        }
    }

    /// Placeholder tab while `source` loads in the background.
    pub fn loading(key: u64, source: PathBuf) -> Self {
        let title = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            key,
            figure: Figure::new(title),
            source: Some(source),
            source_stamp: None,
            modified: false,
            state: TabState::Loading,
            autosave_id: None,
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn figure(&self) -> &Figure {
        &self.figure
    }

    /// Mutable access for edits; call [`FigureTab::sync_modified`] after.
    pub fn figure_mut(&mut self) -> &mut Figure {
        &mut self.figure
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn state(&self) -> TabState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == TabState::Loading
    }

    /// Loading or syncing.
    pub fn is_busy(&self) -> bool {
        self.state != TabState::Ready
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Refresh the cached modified flag; true if it flipped.
    pub fn sync_modified(&mut self) -> bool {
        let now = self.figure.is_modified();
        std::mem::replace(&mut self.modified, now) != now
    }

    pub fn autosave_id(&self) -> Option<u32> {
        self.autosave_id
    }

    /// Assigned once; later calls are ignored.
    pub fn assign_autosave_id(&mut self, id: u32) {
        if self.autosave_id.is_none() {
            self.autosave_id = Some(id);
        }
    }

    /// The source file was changed by someone else since we last read or
    /// wrote it, and the tab holds nothing that a reload would lose.
    pub fn is_stale(&self) -> bool {
        if self.is_busy() || self.modified {
            return false;
        }
        let Some(path) = self.source.as_deref() else { return false };
        match file_timestamp(path) {
            Some(stamp) => self.source_stamp != Some(stamp),
            None => false,
        }
    }

    /// Returns false if the tab was busy.
    pub fn begin_sync(&mut self) -> bool {
        if self.is_busy() || self.source.is_none() {
            return false;
        }
        self.state = TabState::Syncing;
        true
    }

    /// The reload could not be requested; back to ready, unchanged.
    pub fn cancel_sync(&mut self) {
        if self.state == TabState::Syncing {
            self.state = TabState::Ready;
        }
    }

    /// A load or re-sync delivered `figure` from the source file.
    pub fn finish_load(&mut self, figure: Figure, stamp: Option<SystemTime>) {
        self.figure = figure;
        self.modified = self.figure.is_modified();
        self.source_stamp = stamp;
        self.state = TabState::Ready;
    }

    /// A re-sync could not parse the changed file; keep what we have and
    /// flag it so the user decides.
    pub fn fail_sync(&mut self) {
        self.figure.set_modified(true);
        self.modified = true;
        self.source_stamp = self.source.as_deref().and_then(file_timestamp);
        self.state = TabState::Ready;
    }

    /// The figure was just written to `path`.
    pub fn mark_saved(&mut self, path: PathBuf) {
        self.figure.set_modified(false);
        self.modified = false;
        self.source_stamp = file_timestamp(&path);
        self.source = Some(path);
    }
}
