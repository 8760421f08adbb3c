// src/autosave/recovery.rs
//! One-shot crash recovery: reconcile the last open figures with the
//! backups left behind by a previous run, then empty the directory.
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::dir::{blob_path, purge_dir, state_path};
use super::state::read_state;
use crate::figure::Figure;
use crate::persistence::read_figure;

#[derive(Debug)]
pub struct RecoveredFigure {
    pub figure: Figure,
    /// `None` when the figure never had a file or its directory is gone.
    pub path: Option<PathBuf>,
    /// Loaded from a backup blob rather than the original file.
    pub from_backup: bool,
}

#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Figures to install as the new set of open tabs, in order.
    pub figures: Vec<RecoveredFigure>,
}

impl RecoveryReport {
    pub fn recovered_count(&self) -> usize {
        self.figures.iter().filter(|f| f.from_backup).count()
    }

    /// Only genuine recoveries warrant telling the user.
    pub fn recovered_any(&self) -> bool {
        self.recovered_count() > 0
    }
}

fn parent_exists(path: &Path) -> bool {
    path.parent().map_or(false, |dir| dir.as_os_str().is_empty() || dir.is_dir())
}

pub fn run_recovery(dir: &Path, last_open: &[PathBuf]) -> RecoveryReport {
    let mut prior = read_state(&state_path(dir)).unwrap_or_default();
    let mut report = RecoveryReport::default();

    for path in last_open {
        let entry = prior
            .iter()
            .find(|(_, src)| src.as_deref() == Some(path.as_path()))
            .map(|(id, _)| *id);

        let mut backup = None;
        if let Some(id) = entry {
            prior.remove(&id);
            match read_figure(&blob_path(dir, id)) {
                Ok(fig) => backup = Some(fig),
                Err(e) => debug!("backup {id} for {} unusable: {e}", path.display()),
            }
        }
        let from_backup = backup.is_some();
        let loaded = match backup {
            Some(fig) => Ok(fig),
            None => read_figure(path),
        };
        let mut figure = match loaded {
            Ok(fig) => fig,
            Err(e) => {
                warn!("cannot reopen {}: {}", path.display(), e.brief());
                continue;
            }
        };

        let orphaned = !parent_exists(path);
        if from_backup || orphaned {
            figure.set_modified(true);
        }
        report.figures.push(RecoveredFigure {
            figure,
            path: (!orphaned).then(|| path.clone()),
            from_backup,
        });
    }

    // Backups of figures that were not on the last-open list.
    for (id, src) in prior {
        let mut figure = match read_figure(&blob_path(dir, id)) {
            Ok(fig) => fig,
            Err(e) => {
                debug!("skipping backup {id}: {e}");
                continue;
            }
        };
        figure.set_modified(true);
        report.figures.push(RecoveredFigure {
            figure,
            path: src.filter(|p| parent_exists(p)),
            from_backup: true,
        });
    }

    match purge_dir(dir) {
        Ok(n) => debug!("recovery consumed {n} auto-save entries"),
        Err(e) => warn!("cannot clean auto-save directory after recovery: {e}"),
    }
    info!(
        "crash recovery reopened {} figure(s), {} from backup",
        report.figures.len(),
        report.recovered_count()
    );
    report
}
