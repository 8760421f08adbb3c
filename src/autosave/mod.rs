// src/autosave/mod.rs
//! Periodic backup of open figures into a locked auto-save directory, and
//! crash recovery from it on the next start.
//!
//! The controller runs on the caller's thread. Every fine tick it looks for
//! one figure whose file changed on disk; every `coarse_every` ticks it
//! prunes entries of closed tabs, syncs source paths, and hands at most one
//! figure snapshot to the background worker. Only one job is ever
//! outstanding.
pub mod dir;
pub mod job;
pub mod recovery;
pub mod state;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::TryRecvError;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::AutosaveConfig;
use crate::figure::Figure;
use crate::tab::FigureTab;
use dir::AutosaveDir;
use job::{start_autosave_worker, AutosaveWorker, BackupJob, JobRequest, JobResponse};
use recovery::RecoveryReport;
use state::StateMap;

/// Controller-side bookkeeping for one backed-up figure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutosaveEntry {
    pub id: u32,
    pub source: Option<PathBuf>,
    pub last_backup: DateTime<Utc>,
    pub last_backup_count: u64,
    /// The last backup write failed; select this figure again.
    pub needs_retry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InFlight {
    /// Payload id and blob removals carried by the running job.
    Backup { payload: Option<u32>, removed: Vec<u32> },
    Recovery,
}

fn backup_due(cfg: &AutosaveConfig, entry: &AutosaveEntry, count: u64, now: DateTime<Utc>) -> bool {
    let delta = count as i64 - entry.last_backup_count as i64;
    entry.needs_retry
        || delta < 0
        || delta >= cfg.edit_threshold as i64
        || (delta > 0 && now - entry.last_backup > cfg.max_staleness())
}

pub struct AutoSaver {
    cfg: AutosaveConfig,
    dir: AutosaveDir,
    worker: Option<AutosaveWorker>,
    entries: BTreeMap<u32, AutosaveEntry>,
    next_id: u32,
    in_flight: Option<InFlight>,
    /// Blobs of pruned entries not yet handed to a job.
    pending_removals: Vec<u32>,
    force_update: bool,
    ticks: u64,
}

impl AutoSaver {
    pub fn new(cfg: AutosaveConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            cfg,
            dir: AutosaveDir::new(dir),
            worker: None,
            entries: BTreeMap::new(),
            next_id: 1,
            in_flight: None,
            pending_removals: Vec::new(),
            force_update: false,
            ticks: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Lock the directory and start the worker. Safe to call repeatedly.
    pub fn initialize(&mut self) -> bool {
        if !self.dir.initialize() {
            return false;
        }
        if self.worker.is_none() {
            match start_autosave_worker(self.dir.path().to_path_buf()) {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => {
                    warn!("cannot start auto-save worker: {e}");
                    return false;
                }
            }
        }
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.dir.is_ready() && self.worker.is_some()
    }

    pub fn is_restore_needed(&self) -> bool {
        self.dir.is_restore_needed()
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self.in_flight, Some(InFlight::Recovery))
    }

    pub fn is_job_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// A failed job asked for the next cycle to write again.
    pub fn is_update_forced(&self) -> bool {
        self.force_update
    }

    pub fn entry(&self, id: u32) -> Option<&AutosaveEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &AutosaveEntry> {
        self.entries.values()
    }

    /// Start crash recovery on the worker. Backup cycles are suspended until
    /// its report comes back through [`AutoSaver::poll`].
    pub fn start_recovery(&mut self, last_open: Vec<PathBuf>) -> bool {
        if !self.is_initialized() || !self.dir.is_restore_needed() || self.in_flight.is_some() {
            return false;
        }
        info!("starting crash recovery for {} figure(s)", last_open.len());
        if self.submit(JobRequest::Recover { last_open }) {
            self.in_flight = Some(InFlight::Recovery);
            true
        } else {
            self.dir.clear_restore_needed();
            false
        }
    }

    /// Fine tick. Returns the index of a tab just marked syncing, which the
    /// caller must reload. Every `coarse_every`-th tick also runs a backup
    /// cycle.
    pub fn fine_tick(&mut self, tabs: &mut [FigureTab], now: DateTime<Utc>) -> Option<usize> {
        if !self.is_initialized() {
            self.initialize();
            return None;
        }

        // One reload per tick, so a mass change (e.g. a checkout) trickles in.
        let resync = tabs.iter().position(FigureTab::is_stale);
        if let Some(idx) = resync {
            tabs[idx].begin_sync();
            debug!("{:?} changed on disk, reloading", tabs[idx].source());
        }

        self.ticks += 1;
        if self.ticks % u64::from(self.cfg.coarse_every.max(1)) == 0 {
            self.coarse_cycle(tabs, now);
        }
        resync
    }

    /// Backup decision pass. Returns true if a job was started.
    pub fn coarse_cycle(&mut self, tabs: &mut [FigureTab], now: DateTime<Utc>) -> bool {
        if !self.is_initialized() {
            self.initialize();
            return false;
        }
        if self.in_flight.is_some() || self.dir.is_restore_needed() {
            return false;
        }
        let mut need_update = self.force_update || !self.pending_removals.is_empty();

        // prune entries whose tab is gone
        let live: HashSet<u32> = tabs.iter().filter_map(FigureTab::autosave_id).collect();
        let gone: Vec<u32> = self.entries.keys().filter(|id| !live.contains(id)).copied().collect();
        for id in gone {
            self.entries.remove(&id);
            self.pending_removals.push(id);
            need_update = true;
        }

        // follow renames / save-as
        for tab in tabs.iter() {
            let Some(entry) = tab.autosave_id().and_then(|id| self.entries.get_mut(&id)) else {
                continue;
            };
            if entry.source.as_deref() != tab.source() {
                entry.source = tab.source().map(Path::to_path_buf);
                need_update = true;
            }
        }

        let payload = self.select_payload(tabs, now, &mut need_update);

        if !need_update {
            return false;
        }
        let payload_id = payload.as_ref().map(|(id, _)| *id);
        let snapshot: StateMap = self
            .entries
            .iter()
            .map(|(id, e)| (*id, e.source.clone()))
            .collect();
        debug!(
            "auto-save job: {} entries, {} pruned, payload {:?}",
            snapshot.len(),
            self.pending_removals.len(),
            payload_id
        );

        let removed = self.pending_removals.clone();
        let job = BackupJob { state: snapshot, removed: removed.clone(), payload };
        if self.submit(JobRequest::Backup(job)) {
            self.force_update = false;
            self.pending_removals.clear();
            self.in_flight = Some(InFlight::Backup { payload: payload_id, removed });
            true
        } else {
            self.force_update = true;
            self.mark_retry(payload_id);
            false
        }
    }

    /// Walk tabs in order, registering new ones, and clone the first figure
    /// that is due for a backup.
    fn select_payload(
        &mut self,
        tabs: &mut [FigureTab],
        now: DateTime<Utc>,
        need_update: &mut bool,
    ) -> Option<(u32, Figure)> {
        for tab in tabs.iter_mut() {
            if tab.is_busy() {
                continue;
            }
            let count = tab.figure().modify_count();

            let Some(id) = tab.autosave_id() else {
                let id = self.next_id;
                self.next_id += 1;
                tab.assign_autosave_id(id);
                self.entries.insert(id, AutosaveEntry {
                    id,
                    source: tab.source().map(Path::to_path_buf),
                    last_backup: now,
                    last_backup_count: count,
                    needs_retry: false,
                });
                *need_update = true;
                // an untouched figure has nothing to lose yet
                if tab.figure().is_modified() {
                    return Some((id, tab.figure().clone()));
                }
                continue;
            };

            let Some(entry) = self.entries.get_mut(&id) else { continue };
            if backup_due(&self.cfg, entry, count, now) {
                entry.last_backup = now;
                entry.last_backup_count = count;
                entry.needs_retry = false;
                *need_update = true;
                return Some((id, tab.figure().clone()));
            }
        }
        None
    }

    fn submit(&mut self, req: JobRequest) -> bool {
        let Some(worker) = &self.worker else { return false };
        if worker.submit(req) {
            return true;
        }
        warn!("auto-save worker is gone; restarting on next cycle");
        self.worker = None;
        false
    }

    /// Apply a finished job, if any. Returns the recovery report once crash
    /// recovery completes.
    pub fn poll(&mut self) -> Option<RecoveryReport> {
        self.in_flight.as_ref()?;
        let res = self.worker.as_ref()?.try_recv();
        match res {
            Ok(resp) => self.on_job_done(resp),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.on_worker_lost(),
        }
    }

    /// Block up to `timeout` for the outstanding job.
    pub fn wait_idle(&mut self, timeout: std::time::Duration) -> Option<RecoveryReport> {
        self.in_flight.as_ref()?;
        let res = self.worker.as_ref()?.recv_timeout(timeout);
        match res {
            Ok(resp) => self.on_job_done(resp),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => self.on_worker_lost(),
        }
    }

    fn on_job_done(&mut self, resp: JobResponse) -> Option<RecoveryReport> {
        let in_flight = self.in_flight.take();
        match resp {
            JobResponse::Backup(outcome) => {
                if outcome.failed() {
                    self.force_update = true;
                    if !outcome.payload_ok {
                        self.mark_retry(outcome.payload_id);
                    }
                }
                None
            }
            JobResponse::Recovered(report) => {
                self.dir.clear_restore_needed();
                Some(report)
            }
            JobResponse::Cancelled => {
                // removals run before the cancel check, the payload may not have
                if let Some(InFlight::Backup { payload, .. }) = in_flight {
                    self.mark_retry(payload);
                }
                self.force_update = true;
                None
            }
        }
    }

    fn mark_retry(&mut self, id: Option<u32>) {
        if let Some(entry) = id.and_then(|id| self.entries.get_mut(&id)) {
            entry.needs_retry = true;
        }
    }

    fn on_worker_lost(&mut self) -> Option<RecoveryReport> {
        warn!("auto-save worker stopped unexpectedly");
        self.worker = None;
        self.force_update = true;
        match self.in_flight.take() {
            Some(InFlight::Recovery) => {
                self.dir.clear_restore_needed();
                Some(RecoveryReport::default())
            }
            Some(InFlight::Backup { payload, removed }) => {
                self.mark_retry(payload);
                self.pending_removals.extend(removed);
                None
            }
            None => None,
        }
    }

    /// Wait (bounded) for the outstanding job and cancel it if it overruns.
    /// The worker thread is joined before the directory is emptied and the
    /// lock released, so nothing lands in it afterwards.
    pub fn shutdown(&mut self) {
        if self.in_flight.is_some() {
            let wait = self.cfg.shutdown_wait();
            let res = self.worker.as_ref().map(|w| w.recv_timeout(wait));
            match res {
                Some(Ok(resp)) => {
                    self.on_job_done(resp);
                }
                Some(Err(_)) => {
                    warn!("auto-save job still running after {wait:?}; cancelling");
                    if let Some(worker) = &self.worker {
                        worker.cancel();
                    }
                }
                None => {}
            }
            self.in_flight = None;
        }
        self.pending_removals.clear();
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.dir.shutdown();
        self.entries.clear();
        info!("auto-save shut down");
    }
}
