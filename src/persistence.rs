// src/persistence.rs
//! Read/write figures to disk. Writes go through a temp file in the
//! target directory and are renamed into place.
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::FigureError;
use crate::figure::Figure;

/// Current on-disk FypML schema version.
pub const FYP_VERSION: u32 = 1;

/// Extension used for figure files, backups included.
pub const FYP_EXTENSION: &str = "fyp";

#[derive(Serialize)]
struct FypOut<'a> {
    version: u32,
    figure: &'a Figure,
}

#[derive(Deserialize)]
struct FypIn {
    version: u32,
    figure: Figure,
}

pub fn encode_figure(figure: &Figure) -> Result<Vec<u8>, FigureError> {
    let doc = FypOut { version: FYP_VERSION, figure };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Decoded figures start out unmodified with a zero modify count.
pub fn decode_figure(bytes: &[u8]) -> Result<Figure, FigureError> {
    let doc: FypIn = serde_json::from_slice(bytes)?;
    if doc.version > FYP_VERSION {
        return Err(FigureError::UnsupportedVersion(doc.version));
    }
    Ok(doc.figure)
}

pub fn write_figure(figure: &Figure, path: &Path) -> Result<(), FigureError> {
    let bytes = encode_figure(figure)?;
    write_atomic(path, &bytes).map_err(|e| FigureError::io(path, e))
}

/// Whole-file replace: temp file next to `path`, fsync, rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn read_figure(path: &Path) -> Result<Figure, FigureError> {
    let bytes = fs::read(path).map_err(|e| FigureError::io(path, e))?;
    decode_figure(&bytes)
}

/// On-disk modification time, `None` if the file is missing.
pub fn file_timestamp(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
