// src/lib.rs
// Auto-save, crash recovery and tab lifecycle for the figure composer.
pub mod autosave;
pub mod composer;
pub mod config;
pub mod error;
pub mod figure;
pub mod loader;
pub mod locked_file;
pub mod persistence;
pub mod tab;
pub mod workspace;

pub use autosave::AutoSaver;
pub use composer::{Composer, ComposerListener, NoopListener};
pub use config::{AutosaveConfig, Config};
pub use error::{AutosaveError, ConfigError, FigureError};
pub use figure::{Figure, FigureNode};
pub use tab::{FigureTab, TabState};
pub use workspace::{FileWorkspace, WorkspaceContext};
