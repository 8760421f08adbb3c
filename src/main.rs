//! src/main.rs – figcomp launcher: headless composer session with auto-save
//! and crash recovery
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use figcomp::autosave::dir::{state_path, LOCK_FILE_NAME};
use figcomp::autosave::state::read_state;
use figcomp::config::CONFIG_FILE_NAME;
use figcomp::persistence::{write_figure, FYP_EXTENSION};
use figcomp::{Composer, ComposerListener, Config, Figure, FileWorkspace, WorkspaceContext};

/*──────────────────────── CLI structures ──────────────────────*/
#[derive(Parser)]
#[command(name = "figcomp")]
#[command(about = "Figure composer session with auto-save and crash recovery", long_about = None)]
struct Cli {
    /// Figure files to open
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Workspace directory (defaults to the platform data directory)
    #[arg(long, value_name = "DIR", global = true)]
    workspace: Option<PathBuf>,

    /// Config file (defaults to figcomp.toml in the workspace)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty figure file
    New {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Figure title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Show what the auto-save directory currently holds
    Status,
}

/*──────────────────────── shell callbacks ─────────────────────*/
struct ConsoleListener;

impl ComposerListener for ConsoleListener {
    fn figures_changed(&mut self) {
        log::debug!("figure list changed");
    }

    fn recovery_completed(&mut self, recovered: usize) {
        println!("Recovered unsaved work in {recovered} figure(s) after an abnormal exit.");
    }

    fn load_failed(&mut self, path: &Path, message: &str) {
        eprintln!("Could not open {}: {message}", path.display());
    }
}

/*──────────────────────── main ────────────────────────────────*/
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let root = cli.workspace.clone().unwrap_or_else(FileWorkspace::default_root);
    let config_path = cli.config.clone().unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
    let config = Config::load(&config_path)?;

    match cli.command {
        Some(Commands::New { file, title }) => new_figure(&file, title),
        Some(Commands::Status) => print_status(&root),
        None => run_session(config, root, cli.files),
    }
}

fn new_figure(file: &Path, title: Option<String>) -> Result<()> {
    let title = title.unwrap_or_else(|| {
        file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    });
    write_figure(&Figure::new(title), file)
        .with_context(|| format!("creating {}", file.display()))?;
    println!("Created {}", file.display());
    Ok(())
}

fn print_status(root: &Path) -> Result<()> {
    let workspace = FileWorkspace::open(root)?;
    let dir = workspace.autosave_dir();
    println!("Auto-save directory: {}", dir.display());
    if !dir.is_dir() {
        println!("  (absent)");
        return Ok(());
    }
    println!("  lock sentinel: {}", if dir.join(LOCK_FILE_NAME).exists() { "present" } else { "absent" });

    match read_state(&state_path(&dir)) {
        Some(entries) => {
            println!("  state entries: {}", entries.len());
            for (id, src) in entries {
                let src = src.map(|p| p.display().to_string()).unwrap_or_else(|| "(untitled)".into());
                println!("    #{id}: {src}");
            }
        }
        None => println!("  state entries: none"),
    }

    let blobs = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == FYP_EXTENSION))
        .count();
    println!("  backup blobs: {blobs}");
    Ok(())
}

fn run_session(config: Config, root: PathBuf, files: Vec<PathBuf>) -> Result<()> {
    let workspace: Arc<dyn WorkspaceContext> = Arc::new(
        FileWorkspace::open(&root).with_context(|| format!("opening workspace {}", root.display()))?,
    );
    let mut composer = Composer::new(&config, workspace, Box::new(ConsoleListener))?;

    /* ───── graceful exit on Ctrl-C / SIGTERM / SIGHUP ───── */
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }
    #[cfg(unix)]
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&shutdown))?;

    // recovery first: it reads the last-open list that opening files rewrites
    if composer.start() {
        info!("crash recovery running");
    }
    for file in files {
        if let Err(e) = composer.open_figure(&file) {
            warn!("cannot open {}: {e}", file.display());
        }
    }

    /* ───── tick loop ───── */
    let tick = config.autosave.tick();
    let poll_every = Duration::from_millis(100).min(tick);
    let mut last_tick = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        composer.poll();
        if last_tick.elapsed() >= tick {
            last_tick = Instant::now();
            composer.tick();
        }
        thread::sleep(poll_every);
    }

    info!("shutting down");
    composer.shutdown();
    Ok(())
}
