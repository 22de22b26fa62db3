//! File watching and the interactive watch session.
//!
//! The controller only talks to a [`WatchRegistry`]. The `notify` backed
//! implementation watches the *parent directory* of each file, because most
//! editors save by writing a new file and renaming it over the old one, which
//! silently ends a watch on the file itself.
//!
//! The session funnels watcher callbacks and console commands from helper
//! threads into one channel, and the main thread drains it with a timeout
//! equal to the next debounce deadline. All controller work happens there.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::controller::{PanelMessage, PanelObserver, SelectionController};
use crate::raster::RasterBackend;
use crate::registry::FigureList;
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("{} is not being watched", .0.display())]
    NotWatched(PathBuf),
}

/// Registration of paths with a change-notification source.
pub trait WatchRegistry {
    fn watch(&mut self, path: &Path) -> Result<(), WatchError>;
    fn unwatch(&mut self, path: &Path) -> Result<(), WatchError>;
}

/// Everything the session loop reacts to.
#[derive(Debug)]
pub enum HostEvent {
    FileChanged(PathBuf),
    Command(SessionCommand),
    InputClosed,
}

pub struct NotifyWatchRegistry {
    watcher: RecommendedWatcher,
    /// Watched directory -> number of files watched in it.
    dirs: HashMap<PathBuf, usize>,
}

impl NotifyWatchRegistry {
    /// Changed paths are sent to `events` as [`HostEvent::FileChanged`].
    pub fn new(events: Sender<HostEvent>) -> Result<Self, WatchError> {
        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if event.kind.is_access() {
                        return;
                    }
                    for path in event.paths {
                        let _ = events.send(HostEvent::FileChanged(path));
                    }
                }
                Err(e) => log::warn!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )?;
        Ok(Self {
            watcher,
            dirs: HashMap::new(),
        })
    }
}

fn watch_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl WatchRegistry for NotifyWatchRegistry {
    fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        let dir = watch_dir_of(path);
        let count = self.dirs.get(&dir).copied().unwrap_or(0);
        if count == 0 {
            self.watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            log::debug!("Watching {}", dir.display());
        }
        self.dirs.insert(dir, count + 1);
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
        let dir = watch_dir_of(path);
        let Some(count) = self.dirs.get_mut(&dir) else {
            return Err(WatchError::NotWatched(path.to_path_buf()));
        };
        *count -= 1;
        if *count == 0 {
            self.dirs.remove(&dir);
            self.watcher.unwatch(&dir)?;
            log::debug!("Stopped watching {}", dir.display());
        }
        Ok(())
    }
}

/// A console command typed during a watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    List,
    Select(String),
    Open(PathBuf),
    Reload,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  list            show the figures of the active file
  select NAME     render a figure (a bare NAME works too)
  open PATH       switch to another script
  reload          reload the active file now
  help            show this text
  quit            end the session";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match (word, rest) {
        ("list" | "ls", "") => SessionCommand::List,
        ("reload" | "r", "") => SessionCommand::Reload,
        ("help" | "?", "") => SessionCommand::Help,
        ("quit" | "exit" | "q", "") => SessionCommand::Quit,
        ("select", name) if !name.is_empty() => SessionCommand::Select(name.to_string()),
        ("open", path) if !path.is_empty() => SessionCommand::Open(PathBuf::from(path)),
        _ => SessionCommand::Select(line.to_string()),
    };
    Some(command)
}

/// Output panel and figure list printed to the terminal.
#[derive(Debug, Default)]
pub struct ConsolePanel;

impl ConsolePanel {
    pub fn print_list(&self, list: &FigureList, selection: Option<&str>) {
        if list.is_empty() {
            println!("(no figures)");
            return;
        }
        for entry in list.entries() {
            let marker = if Some(entry.name()) == selection { "*" } else { " " };
            if entry.display_name() == entry.name() {
                println!("{} {}", marker, entry.name());
            } else {
                println!("{} {}  ({})", marker, entry.name(), entry.display_name());
            }
        }
    }
}

impl PanelObserver for ConsolePanel {
    fn output(&mut self, message: &PanelMessage) {
        match message {
            PanelMessage::LoadFailed { .. } | PanelMessage::ExecutionFailed { .. } => {
                eprintln!("{}", message)
            }
            _ => println!("{}", message),
        }
    }

    fn figure_list_replaced(&mut self, list: &FigureList, selection: Option<&str>) {
        self.print_list(list, selection);
    }

    fn rendered(&mut self, name: &str) {
        println!("rendered {}", name);
    }
}

/// Absolute form of `path` so it matches what the watcher reports.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()
            .context("resolving current directory")?
            .join(path)),
    }
}

fn list_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut scripts: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "rhai"))
        .collect();
    scripts.sort();
    Ok(scripts)
}

fn spawn_stdin_reader(events: Sender<HostEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(command) = parse_command(&line) {
                if events.send(HostEvent::Command(command)).is_err() {
                    return;
                }
            }
        }
        let _ = events.send(HostEvent::InputClosed);
    });
}

type Session = SelectionController<NotifyWatchRegistry, ConsolePanel>;

fn open_file(controller: &mut Session, path: &Path) -> Result<()> {
    let path = resolve_path(path)?;
    // Watch problems are reported but the file stays usable through `reload`.
    if let Err(e) = controller.select_file(&path) {
        eprintln!("warning: {} will not reload automatically: {}", path.display(), e);
    }
    Ok(())
}

/// Returns false when the session should end.
fn handle_command(controller: &mut Session, command: SessionCommand) -> Result<bool> {
    match command {
        SessionCommand::List => {
            let panel = controller.observer();
            panel.print_list(controller.figures(), controller.selection());
        }
        SessionCommand::Select(name) => {
            match controller.figures().resolve(&name).map(|e| e.name().to_string()) {
                Some(name) => controller.select_figure(&name),
                None => eprintln!("no figure named {}", name),
            }
        }
        SessionCommand::Open(path) => open_file(controller, &path)?,
        SessionCommand::Reload => match controller.active_path().map(Path::to_path_buf) {
            Some(path) => controller.file_changed(&path),
            None => eprintln!("no file selected"),
        },
        SessionCommand::Help => println!("{}", HELP),
        SessionCommand::Quit => return Ok(false),
    }
    Ok(true)
}

fn next_event(rx: &Receiver<HostEvent>, deadline: Option<Instant>) -> Result<HostEvent, RecvTimeoutError> {
    match deadline {
        Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

/// Run an interactive session on `target`, a script or a directory of scripts.
pub fn run_watch_session(
    settings: &Settings,
    target: &Path,
    figure: Option<&str>,
    preview: Option<PathBuf>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let registry = NotifyWatchRegistry::new(tx.clone()).context("starting file watcher")?;
    let backend = RasterBackend::new(settings.dpi, preview);
    let mut controller = SelectionController::new(settings, Box::new(backend), registry, ConsolePanel);

    if target.is_dir() {
        controller.directory_selected(target);
        println!("Scripts in {}:", target.display());
        for script in list_scripts(target)? {
            println!("  {}", script.display());
        }
        println!("Use `open PATH` to pick one.");
    } else {
        open_file(&mut controller, target)?;
    }
    if let Some(name) = figure {
        handle_command(&mut controller, SessionCommand::Select(name.to_string()))?;
    }

    spawn_stdin_reader(tx);
    log::info!("Watching for changes; type `help` for commands");

    loop {
        match next_event(&rx, controller.next_deadline()) {
            Ok(HostEvent::FileChanged(path)) => controller.notify_change(&path, Instant::now()),
            Ok(HostEvent::Command(command)) => {
                if !handle_command(&mut controller, command)? {
                    break;
                }
            }
            Ok(HostEvent::InputClosed) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        controller.poll_timers(Instant::now());
    }
    Ok(())
}
