// src/autosave/job.rs
//! Background worker for auto-save jobs. One long-lived thread fed by a
//! request channel; the controller keeps at most one request outstanding.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use super::dir::{blob_path, state_path};
use super::recovery::{run_recovery, RecoveryReport};
use super::state::{write_state, StateMap};
use crate::figure::Figure;
use crate::persistence::write_figure;

/// Backup-update job: prune blobs, write one payload, rewrite state.
#[derive(Debug)]
pub struct BackupJob {
    pub state: StateMap,
    pub removed: Vec<u32>,
    pub payload: Option<(u32, Figure)>,
}

#[derive(Debug)]
pub enum JobRequest {
    Backup(BackupJob),
    Recover { last_open: Vec<PathBuf> },
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOutcome {
    pub payload_id: Option<u32>,
    pub payload_ok: bool,
    pub state_ok: bool,
}

impl BackupOutcome {
    pub fn failed(&self) -> bool {
        !(self.payload_ok && self.state_ok)
    }
}

#[derive(Debug)]
pub enum JobResponse {
    Backup(BackupOutcome),
    Recovered(RecoveryReport),
    Cancelled,
}

pub struct AutosaveWorker {
    req_tx: Sender<JobRequest>,
    resp_rx: Receiver<JobResponse>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn start_autosave_worker(dir: PathBuf) -> io::Result<AutosaveWorker> {
    let (req_tx, req_rx) = mpsc::channel::<JobRequest>();
    let (resp_tx, resp_rx) = mpsc::channel();
    let cancel = Arc::new(AtomicBool::new(false));

    let thread_cancel = Arc::clone(&cancel);
    let handle = thread::Builder::new()
        .name("autosave".into())
        .spawn(move || {
            while let Ok(req) = req_rx.recv() {
                let resp = match req {
                    JobRequest::Backup(job) => match run_backup(&dir, job, &thread_cancel) {
                        Some(outcome) => JobResponse::Backup(outcome),
                        None => JobResponse::Cancelled,
                    },
                    JobRequest::Recover { last_open } => {
                        JobResponse::Recovered(run_recovery(&dir, &last_open))
                    }
                    JobRequest::Quit => break,
                };
                if resp_tx.send(resp).is_err() {
                    break;
                }
            }
        })?;

    Ok(AutosaveWorker { req_tx, resp_rx, cancel, handle: Some(handle) })
}

impl AutosaveWorker {
    /// Returns false if the worker thread is gone.
    pub fn submit(&self, req: JobRequest) -> bool {
        self.cancel.store(false, Ordering::SeqCst);
        self.req_tx.send(req).is_ok()
    }

    pub fn try_recv(&self) -> Result<JobResponse, TryRecvError> {
        self.resp_rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<JobResponse, RecvTimeoutError> {
        self.resp_rx.recv_timeout(timeout)
    }

    /// Ask the running job to stop at its next step boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Stop the thread and wait for it. A job still running finishes its
    /// current write, sees the cancel flag, and exits before this returns.
    pub fn stop(mut self) {
        let _ = self.req_tx.send(JobRequest::Quit);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("auto-save worker panicked");
            }
        }
    }
}

/// Runs a backup job; `None` when cancelled between steps.
fn run_backup(dir: &Path, job: BackupJob, cancel: &AtomicBool) -> Option<BackupOutcome> {
    for id in &job.removed {
        match std::fs::remove_file(blob_path(dir, *id)) {
            Ok(()) => debug!("removed backup blob {id}"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot remove backup blob {id}: {e}"),
        }
    }
    if cancel.load(Ordering::SeqCst) {
        return None;
    }

    let payload_id = job.payload.as_ref().map(|(id, _)| *id);
    let payload_ok = match &job.payload {
        Some((id, figure)) => match write_figure(figure, &blob_path(dir, *id)) {
            Ok(()) => {
                debug!("backed up figure {id}");
                true
            }
            Err(e) => {
                warn!("backup of figure {id} failed: {e}");
                false
            }
        },
        None => true,
    };
    if cancel.load(Ordering::SeqCst) {
        return None;
    }

    let state_ok = write_state(&state_path(dir), &job.state);
    Some(BackupOutcome { payload_id, payload_ok, state_ok })
}
