// src/composer.rs
//! Headless stand-in for the composer window: owns the open figure tabs,
//! drives the loader and the auto-saver, and tells a listener when the
//! tab list changes.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::autosave::recovery::RecoveryReport;
use crate::autosave::AutoSaver;
use crate::config::Config;
use crate::error::FigureError;
use crate::figure::Figure;
use crate::loader::{start_loader, LoadKind, LoadResponse, Loader};
use crate::persistence::{file_timestamp, read_figure, write_figure};
use crate::tab::FigureTab;
use crate::workspace::WorkspaceContext;

/// Callbacks into the UI shell. All run on the composer's thread.
pub trait ComposerListener {
    /// Tabs were added, removed, reloaded, or changed modified state.
    fn figures_changed(&mut self) {}

    /// Crash recovery restored `recovered` figures from backups. Not called
    /// when nothing came from a backup.
    fn recovery_completed(&mut self, _recovered: usize) {}

    /// Opening `path` failed. Suppressed while other loads are pending.
    fn load_failed(&mut self, _path: &Path, _message: &str) {}
}

pub struct NoopListener;

impl ComposerListener for NoopListener {}

pub struct Composer {
    tabs: Vec<FigureTab>,
    next_key: u64,
    loader: Loader,
    autosaver: AutoSaver,
    workspace: Arc<dyn WorkspaceContext>,
    listener: Box<dyn ComposerListener>,
}

impl Composer {
    pub fn new(
        cfg: &Config,
        workspace: Arc<dyn WorkspaceContext>,
        listener: Box<dyn ComposerListener>,
    ) -> io::Result<Self> {
        let autosaver = AutoSaver::new(cfg.autosave.clone(), workspace.autosave_dir());
        Ok(Self {
            tabs: Vec::new(),
            next_key: 1,
            loader: start_loader()?,
            autosaver,
            workspace,
            listener,
        })
    }

    /// Take the auto-save lock and, after a crash, start recovery. Call
    /// before opening anything so the last-open list is still intact.
    pub fn start(&mut self) -> bool {
        if !self.autosaver.initialize() {
            info!("auto-save unavailable for now; will retry");
            return false;
        }
        self.recover_if_needed()
    }

    /// Start crash recovery when a crash was detected and nothing is running.
    /// Backup cycles stay suspended until it completes.
    fn recover_if_needed(&mut self) -> bool {
        if !self.autosaver.is_restore_needed() || self.autosaver.is_job_in_flight() {
            return false;
        }
        let mut last_open = self.workspace.last_open_figures();
        if last_open.is_empty() {
            last_open.extend(self.workspace.most_recent_file());
        }
        self.autosaver.start_recovery(last_open)
    }

    pub fn tabs(&self) -> &[FigureTab] {
        &self.tabs
    }

    pub fn autosaver(&self) -> &AutoSaver {
        &self.autosaver
    }

    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    fn index_of(&self, key: u64) -> Option<usize> {
        self.tabs.iter().position(|t| t.key() == key)
    }

    /// Notify the shell and keep the workspace's open list current, so a
    /// crash knows what was open.
    fn changed(&mut self) {
        let open: Vec<PathBuf> = self
            .tabs
            .iter()
            .filter_map(|t| t.source().map(Path::to_path_buf))
            .collect();
        self.workspace.set_last_open_figures(open);
        if let Err(e) = self.workspace.flush() {
            warn!("cannot record workspace: {e}");
        }
        self.listener.figures_changed();
    }

    pub fn new_figure(&mut self, title: &str) -> usize {
        let key = self.next_key();
        self.tabs.push(FigureTab::new(key, Figure::new(title), None));
        self.changed();
        self.tabs.len() - 1
    }

    /// Open `path` in a new tab, or return the tab that already shows it.
    pub fn open_figure(&mut self, path: impl Into<PathBuf>) -> Result<usize, FigureError> {
        let path = path.into();
        if let Some(idx) = self.tabs.iter().position(|t| t.source() == Some(path.as_path())) {
            return Ok(idx);
        }
        let key = self.next_key();
        if !self.loader.request(key, path.clone(), LoadKind::Open) {
            return Err(FigureError::io(path, io::Error::other("figure loader stopped")));
        }
        self.tabs.push(FigureTab::loading(key, path));
        self.changed();
        Ok(self.tabs.len() - 1)
    }

    /// Copy of an open figure in a new, never-saved tab.
    pub fn duplicate_figure(&mut self, idx: usize) -> Result<usize, FigureError> {
        let tab = self.tabs.get(idx).ok_or(FigureError::NoSuchTab(idx))?;
        if tab.is_busy() {
            return Err(FigureError::Busy);
        }
        let mut copy = tab.figure().clone();
        copy.set_modified(true);
        let key = self.next_key();
        self.tabs.push(FigureTab::new(key, copy, None));
        self.changed();
        Ok(self.tabs.len() - 1)
    }

    /// Apply an edit to an open figure. `None` if the tab is missing or busy.
    pub fn edit<R>(&mut self, idx: usize, f: impl FnOnce(&mut Figure) -> R) -> Option<R> {
        let tab = self.tabs.get_mut(idx)?;
        if tab.is_busy() {
            return None;
        }
        let out = f(tab.figure_mut());
        if tab.sync_modified() {
            self.changed();
        }
        Some(out)
    }

    /// Save to `target`, or to the tab's own file when `None`.
    pub fn save_figure(&mut self, idx: usize, target: Option<PathBuf>) -> Result<(), FigureError> {
        let tab = self.tabs.get_mut(idx).ok_or(FigureError::NoSuchTab(idx))?;
        if tab.is_busy() {
            return Err(FigureError::Busy);
        }
        let path = target
            .or_else(|| tab.source().map(Path::to_path_buf))
            .ok_or(FigureError::NoPath)?;
        write_figure(tab.figure(), &path)?;
        tab.mark_saved(path.clone());
        self.workspace.add_recent_file(&path);
        self.changed();
        Ok(())
    }

    /// Discard edits and reload from the tab's file.
    pub fn revert_figure(&mut self, idx: usize) -> Result<(), FigureError> {
        let tab = self.tabs.get_mut(idx).ok_or(FigureError::NoSuchTab(idx))?;
        if tab.is_busy() {
            return Err(FigureError::Busy);
        }
        let path = tab.source().map(Path::to_path_buf).ok_or(FigureError::NoPath)?;
        let stamp = file_timestamp(&path);
        let figure = read_figure(&path)?;
        tab.finish_load(figure, stamp);
        self.changed();
        Ok(())
    }

    /// The auto-saver drops the tab's backup on its next cycle.
    pub fn close_figure(&mut self, idx: usize) -> bool {
        if idx >= self.tabs.len() {
            return false;
        }
        self.tabs.remove(idx);
        self.changed();
        true
    }

    /// Fine tick at the current wall-clock time.
    pub fn tick(&mut self) {
        self.tick_at(Utc::now());
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) {
        self.poll();

        let unassigned = self.tabs.iter().filter(|t| t.autosave_id().is_none()).count();
        let mut dirty = false;

        if let Some(idx) = self.autosaver.fine_tick(&mut self.tabs, now) {
            let tab = &mut self.tabs[idx];
            let requested = match tab.source() {
                Some(path) => self.loader.request(tab.key(), path.to_path_buf(), LoadKind::Resync),
                None => false,
            };
            if !requested {
                tab.cancel_sync();
            }
            dirty = true;
        }
        // initialization may have happened inside this tick
        self.recover_if_needed();

        dirty |= self.tabs.iter().filter(|t| t.autosave_id().is_none()).count() != unassigned;
        for tab in &mut self.tabs {
            dirty |= tab.sync_modified();
        }
        if dirty {
            self.changed();
        }
    }

    /// Apply finished loads and a finished recovery.
    pub fn poll(&mut self) {
        if let Some(report) = self.autosaver.poll() {
            self.install_recovered(report);
        }
        while let Some(resp) = self.loader.try_recv() {
            self.apply_load(resp);
        }
    }

    /// Block until outstanding loads and the auto-save job finish, or the
    /// timeout runs out.
    pub fn wait_idle(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.loader.pending() > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.loader.recv_timeout(left) {
                Some(resp) => self.apply_load(resp),
                None => break,
            }
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if let Some(report) = self.autosaver.wait_idle(left) {
            self.install_recovered(report);
        }
    }

    fn apply_load(&mut self, resp: LoadResponse) {
        // the tab may have been closed meanwhile
        let Some(idx) = self.index_of(resp.key) else { return };

        match (resp.kind, resp.result) {
            (kind, Ok(figure)) => {
                self.tabs[idx].finish_load(figure, resp.stamp);
                if kind == LoadKind::Open {
                    self.workspace.add_recent_file(&resp.path);
                }
            }
            (LoadKind::Resync, Err(e)) => {
                warn!("reload of {} failed, keeping edits: {e}", resp.path.display());
                self.tabs[idx].fail_sync();
            }
            (LoadKind::Open, Err(e)) => {
                warn!("cannot open {}: {e}", resp.path.display());
                self.tabs.remove(idx);
                if self.loader.pending() == 0 {
                    self.listener.load_failed(&resp.path, &e.brief());
                }
            }
        }
        self.changed();
    }

    /// Recovered figures become the open set; tabs opened meanwhile stay
    /// after them unless they show the same file or are empty and untitled.
    fn install_recovered(&mut self, report: RecoveryReport) {
        let recovered = report.recovered_count();
        let mut tabs = Vec::with_capacity(report.figures.len() + self.tabs.len());
        for rec in report.figures {
            let key = self.next_key();
            tabs.push(FigureTab::new(key, rec.figure, rec.path));
        }
        for tab in self.tabs.drain(..) {
            let pristine = tab.source().is_none() && !tab.is_modified();
            let duplicate = tab.source().is_some_and(|p| tabs.iter().any(|t| t.source() == Some(p)));
            if !(pristine || duplicate) {
                tabs.push(tab);
            }
        }
        self.tabs = tabs;

        if recovered > 0 {
            self.listener.recovery_completed(recovered);
        }
        self.changed();
    }

    /// Stop auto-save (directory emptied, lock released) and record the
    /// open figures for the next run.
    pub fn shutdown(&mut self) {
        self.autosaver.shutdown();
        self.changed();
    }
}
