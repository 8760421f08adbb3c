// src/loader.rs
//! Background figure loading for tabs: first opens and re-syncs after an
//! external change.
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::SystemTime;

use crate::error::FigureError;
use crate::figure::Figure;
use crate::persistence::{file_timestamp, read_figure};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadKind {
    Open,
    Resync,
}

#[derive(Debug)]
pub enum LoadRequest {
    Load { key: u64, path: PathBuf, kind: LoadKind },
    Quit,
}

#[derive(Debug)]
pub struct LoadResponse {
    /// Key of the tab that asked for the load.
    pub key: u64,
    pub path: PathBuf,
    pub kind: LoadKind,
    /// File timestamp taken before reading.
    pub stamp: Option<SystemTime>,
    pub result: Result<Figure, FigureError>,
}

pub struct Loader {
    req_tx: Sender<LoadRequest>,
    resp_rx: Receiver<LoadResponse>,
    pending: usize,
}

pub fn start_loader() -> io::Result<Loader> {
    let (req_tx, req_rx) = mpsc::channel::<LoadRequest>();
    let (resp_tx, resp_rx) = mpsc::channel();

    thread::Builder::new().name("figure-loader".into()).spawn(move || {
        while let Ok(req) = req_rx.recv() {
            let LoadRequest::Load { key, path, kind } = req else { break };
            let stamp = file_timestamp(&path);
            let result = read_figure(&path);
            if resp_tx.send(LoadResponse { key, path, kind, stamp, result }).is_err() {
                break;
            }
        }
    })?;

    Ok(Loader { req_tx, resp_rx, pending: 0 })
}

impl Loader {
    pub fn request(&mut self, key: u64, path: PathBuf, kind: LoadKind) -> bool {
        let sent = self.req_tx.send(LoadRequest::Load { key, path, kind }).is_ok();
        if sent {
            self.pending += 1;
        }
        sent
    }

    /// Loads requested but not yet collected.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn try_recv(&mut self) -> Option<LoadResponse> {
        let resp = self.resp_rx.try_recv().ok()?;
        self.pending -= 1;
        Some(resp)
    }

    pub fn recv_timeout(&mut self, timeout: std::time::Duration) -> Option<LoadResponse> {
        let resp = self.resp_rx.recv_timeout(timeout).ok()?;
        self.pending -= 1;
        Some(resp)
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        let _ = self.req_tx.send(LoadRequest::Quit);
    }
}
