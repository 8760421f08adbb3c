// src/error.rs
//! Typed errors for the figure store, the auto-save directory and config.
use std::path::PathBuf;

use thiserror::Error;

/// Longest diagnostic shown to the user for a failed load.
pub const BRIEF_MESSAGE_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum FigureError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid FypML figure: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported FypML version {0}")]
    UnsupportedVersion(u32),

    #[error("figure has never been saved; a target path is required")]
    NoPath,

    #[error("no open figure at index {0}")]
    NoSuchTab(usize),

    #[error("figure is still loading")]
    Busy,
}

impl FigureError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Diagnostic cut down to something that fits a dialog line.
    pub fn brief(&self) -> String {
        let msg = self.to_string();
        if msg.chars().count() <= BRIEF_MESSAGE_LEN {
            return msg;
        }
        let mut cut: String = msg.chars().take(BRIEF_MESSAGE_LEN - 3).collect();
        cut.push_str("...");
        cut
    }
}

#[derive(Error, Debug)]
pub enum AutosaveError {
    #[error("cannot create auto-save directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("auto-save directory is locked by another instance")]
    Locked,

    #[error("auto-save I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed auto-save state: {0}")]
    State(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
