// tests/composer_lifecycle_tests.rs
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use test_log::test;

use figcomp::autosave::dir::blob_path;
use figcomp::persistence::{file_timestamp, read_figure, write_figure};
use figcomp::{
    AutosaveConfig, Composer, ComposerListener, Config, Figure, FigureError, FigureNode,
    FileWorkspace, TabState, WorkspaceContext,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Events {
    changes: usize,
    failures: Vec<(PathBuf, String)>,
}

struct Recorder(Rc<RefCell<Events>>);

impl ComposerListener for Recorder {
    fn figures_changed(&mut self) {
        self.0.borrow_mut().changes += 1;
    }

    fn load_failed(&mut self, path: &Path, message: &str) {
        self.0.borrow_mut().failures.push((path.to_path_buf(), message.to_string()));
    }
}

struct Fixture {
    root: TempDir,
    composer: Composer,
    events: Rc<RefCell<Events>>,
    workspace: Arc<FileWorkspace>,
}

fn fixture() -> Fixture {
    let root = TempDir::new().unwrap();
    let events = Rc::new(RefCell::new(Events::default()));
    let workspace = Arc::new(FileWorkspace::open(root.path()).unwrap());
    let cfg = Config { autosave: AutosaveConfig { coarse_every: 1, ..Default::default() } };
    let shared: Arc<dyn WorkspaceContext> = workspace.clone();
    let mut composer = Composer::new(&cfg, shared, Box::new(Recorder(events.clone()))).unwrap();
    composer.start();
    Fixture { root, composer, events, workspace }
}

fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(file_timestamp(path).unwrap() + Duration::from_secs(5)).unwrap();
}

#[test]
fn open_loads_in_background() {
    let mut fx = fixture();
    let path = fx.root.path().join("rates.fyp");
    write_figure(&Figure::new("Spike rates"), &path).unwrap();

    let idx = fx.composer.open_figure(&path).unwrap();
    assert_eq!(fx.composer.tabs()[idx].state(), TabState::Loading);
    assert!(fx.composer.edit(idx, |f| f.set_title("nope")).is_none());

    fx.composer.wait_idle(WAIT);
    let tab = &fx.composer.tabs()[idx];
    assert_eq!(tab.state(), TabState::Ready);
    assert_eq!(tab.figure().title, "Spike rates");
    assert_eq!(fx.workspace.most_recent_file(), Some(path.clone()));
    assert_eq!(fx.workspace.last_open_figures(), vec![path.clone()]);

    // opening again selects the existing tab
    assert_eq!(fx.composer.open_figure(&path).unwrap(), idx);
    assert_eq!(fx.composer.tabs().len(), 1);
}

#[test]
fn failed_opens_report_once() {
    let mut fx = fixture();
    fx.composer.open_figure(fx.root.path().join("missing-1.fyp")).unwrap();
    fx.composer.open_figure(fx.root.path().join("missing-2.fyp")).unwrap();
    fx.composer.wait_idle(WAIT);

    assert!(fx.composer.tabs().is_empty());
    let events = fx.events.borrow();
    assert_eq!(events.failures.len(), 1);
    assert!(events.failures[0].1.chars().count() <= 100);
}

#[test]
fn save_then_revert() {
    let mut fx = fixture();
    let path = fx.root.path().join("fig.fyp");
    let idx = fx.composer.new_figure("Fig 1");
    fx.composer.edit(idx, |f| f.add_node(FigureNode::new("graph"))).unwrap();
    assert!(fx.composer.tabs()[idx].is_modified());

    assert!(matches!(fx.composer.save_figure(idx, None), Err(FigureError::NoPath)));
    fx.composer.save_figure(idx, Some(path.clone())).unwrap();
    assert!(!fx.composer.tabs()[idx].is_modified());
    assert_eq!(fx.composer.tabs()[idx].source(), Some(path.as_path()));

    fx.composer.edit(idx, |f| f.add_node(FigureNode::new("legend"))).unwrap();
    fx.composer.revert_figure(idx).unwrap();
    let tab = &fx.composer.tabs()[idx];
    assert_eq!(tab.figure().nodes().len(), 1);
    assert_eq!(tab.figure().modify_count(), 0);
    assert!(!tab.is_modified());
}

#[test]
fn duplicate_is_untitled_and_modified() {
    let mut fx = fixture();
    let idx = fx.composer.new_figure("orig");
    fx.composer.edit(idx, |f| f.add_node(FigureNode::new("bar"))).unwrap();
    let copy = fx.composer.duplicate_figure(idx).unwrap();

    let tab = &fx.composer.tabs()[copy];
    assert!(tab.source().is_none());
    assert!(tab.is_modified());
    assert!(tab.figure().same_content(fx.composer.tabs()[idx].figure()));
    assert!(matches!(fx.composer.duplicate_figure(9), Err(FigureError::NoSuchTab(9))));
}

#[test]
fn external_change_reloads_clean_tab() {
    let mut fx = fixture();
    let path = fx.root.path().join("fig.fyp");
    write_figure(&Figure::new("v1"), &path).unwrap();
    fx.composer.open_figure(&path).unwrap();
    fx.composer.wait_idle(WAIT);

    write_figure(&Figure::new("v2"), &path).unwrap();
    bump_mtime(&path);
    fx.composer.tick_at(Utc::now());
    assert_eq!(fx.composer.tabs()[0].state(), TabState::Syncing);

    fx.composer.wait_idle(WAIT);
    let tab = &fx.composer.tabs()[0];
    assert_eq!(tab.state(), TabState::Ready);
    assert_eq!(tab.figure().title, "v2");
    assert!(!tab.is_modified());
}

#[test]
fn broken_external_change_keeps_figure_and_marks_it_modified() {
    let mut fx = fixture();
    let path = fx.root.path().join("fig.fyp");
    write_figure(&Figure::new("good"), &path).unwrap();
    fx.composer.open_figure(&path).unwrap();
    fx.composer.wait_idle(WAIT);

    fs::write(&path, b"<<half written>>").unwrap();
    bump_mtime(&path);
    fx.composer.tick_at(Utc::now());
    fx.composer.wait_idle(WAIT);

    let tab = &fx.composer.tabs()[0];
    assert_eq!(tab.state(), TabState::Ready);
    assert_eq!(tab.figure().title, "good");
    assert!(tab.is_modified());
    assert!(fx.events.borrow().failures.is_empty());
}

#[test]
fn modified_tab_ignores_external_change() {
    let mut fx = fixture();
    let path = fx.root.path().join("fig.fyp");
    write_figure(&Figure::new("mine"), &path).unwrap();
    fx.composer.open_figure(&path).unwrap();
    fx.composer.wait_idle(WAIT);
    fx.composer.edit(0, |f| f.set_title("mine, edited")).unwrap();

    write_figure(&Figure::new("theirs"), &path).unwrap();
    bump_mtime(&path);
    fx.composer.tick_at(Utc::now());
    fx.composer.wait_idle(WAIT);
    assert_eq!(fx.composer.tabs()[0].figure().title, "mine, edited");
}

#[test]
fn closing_a_tab_drops_its_backup() {
    let mut fx = fixture();
    let idx = fx.composer.new_figure("scratch");
    fx.composer.edit(idx, |f| f.add_node(FigureNode::new("text"))).unwrap();
    fx.composer.tick_at(Utc::now());
    fx.composer.wait_idle(WAIT);

    let id = fx.composer.tabs()[idx].autosave_id().unwrap();
    let blob = blob_path(fx.composer.autosaver().dir(), id);
    assert_eq!(read_figure(&blob).unwrap().title, "scratch");

    assert!(fx.composer.close_figure(idx));
    fx.composer.tick_at(Utc::now());
    fx.composer.wait_idle(WAIT);
    assert!(!blob.exists());
    assert!(fx.composer.autosaver().entry(id).is_none());
}

#[test]
fn listener_hears_about_changes() {
    let mut fx = fixture();
    let before = fx.events.borrow().changes;
    let idx = fx.composer.new_figure("a");
    fx.composer.edit(idx, |f| f.set_title("b")).unwrap();
    // a second edit does not flip the modified flag
    fx.composer.edit(idx, |f| f.set_title("c")).unwrap();
    assert_eq!(fx.events.borrow().changes, before + 2);

    // id assignment on the next cycle is a change too
    fx.composer.tick_at(Utc::now());
    assert_eq!(fx.events.borrow().changes, before + 3);
}

#[test]
fn shutdown_records_open_figures_and_empties_autosave() {
    let mut fx = fixture();
    let path = fx.root.path().join("fig.fyp");
    write_figure(&Figure::new("kept"), &path).unwrap();
    fx.composer.open_figure(&path).unwrap();
    fx.composer.new_figure("untitled");
    fx.composer.wait_idle(WAIT);
    fx.composer.tick_at(Utc::now());
    fx.composer.shutdown();

    let reopened = FileWorkspace::open(fx.root.path()).unwrap();
    assert_eq!(reopened.last_open_figures(), vec![path]);
    let dir = fx.composer.autosaver().dir();
    assert_eq!(fs::read_dir(dir).unwrap().count(), 1);
}

#[test]
fn ticking_without_start_still_recovers_and_backs_up() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("autosave");
    fs::create_dir_all(&dir).unwrap();
    write_figure(&Figure::new("left over"), &blob_path(&dir, 1)).unwrap();

    let events = Rc::new(RefCell::new(Events::default()));
    let workspace: Arc<dyn WorkspaceContext> = Arc::new(FileWorkspace::open(root.path()).unwrap());
    let cfg = Config { autosave: AutosaveConfig { coarse_every: 1, ..Default::default() } };
    let mut composer = Composer::new(&cfg, workspace, Box::new(Recorder(events))).unwrap();
    let idx = composer.new_figure("fresh");
    composer.edit(idx, |f| f.add_node(FigureNode::new("graph"))).unwrap();

    for _ in 0..5 {
        composer.tick_at(Utc::now());
        composer.wait_idle(WAIT);
    }
    assert!(!composer.autosaver().is_restore_needed());
    let tab = composer.tabs().iter().find(|t| t.figure().title == "fresh").unwrap();
    let id = tab.autosave_id().expect("backups resumed after recovery");
    assert_eq!(read_figure(&blob_path(composer.autosaver().dir(), id)).unwrap().title, "fresh");
}
