//! The reload-and-execute state machine.
//!
//! [`SelectionController`] owns the active script path, the current figure
//! list and the selected figure name, and drives the other parts in response
//! to host events:
//!
//! - a file is picked: watch it, load it, reselect, render
//! - a change notification for the active file: arm the debounce timer
//! - a timer fires: reload, reselect by name, render the new routine body
//! - a figure is picked: render it
//!
//! Everything runs on the host's single event loop. Loads and runs never
//! return errors to the caller; failures are reported to the [`PanelObserver`]
//! and the controller stays operable. Only watch registration errors are
//! returned, and only once the controller's own bookkeeping is consistent.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::debounce::DebounceScheduler;
use crate::executor::{PlotExecutor, RenderBackend};
use crate::figure::FigureHandle;
use crate::loader::{LoadResult, ModuleLoader, Namespace};
use crate::registry::{reconcile, FigureList};
use crate::settings::Settings;
use crate::watcher::{WatchError, WatchRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No file has been selected yet.
    Idle,
    /// The last load succeeded.
    Loaded,
    /// The last load succeeded and the selected figure rendered without error.
    Rendering,
    /// The last load failed.
    LoadFailed,
}

/// A line for the output panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelMessage {
    LoadSucceeded,
    LoadFailed { message: String },
    ExecutionFailed { figure: String, message: String },
    ScriptOutput(String),
}

impl fmt::Display for PanelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelMessage::LoadSucceeded => write!(f, "load succeeded"),
            PanelMessage::LoadFailed { message } => write!(f, "load failed: {}", message),
            PanelMessage::ExecutionFailed { figure, message } => {
                write!(f, "{} failed: {}", figure, message)
            }
            PanelMessage::ScriptOutput(line) => write!(f, "{}", line),
        }
    }
}

/// The UI side: an output panel and a figure list view.
pub trait PanelObserver {
    fn output(&mut self, message: &PanelMessage);

    /// The figure list was rebuilt. `selection` is the reconciled selection.
    fn figure_list_replaced(&mut self, list: &FigureList, selection: Option<&str>);

    /// A figure rendered successfully.
    fn rendered(&mut self, _name: &str) {}
}

/// One reload unit of work. A ticket from an older generation is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadTicket {
    path: PathBuf,
    generation: u64,
}

impl ReloadTicket {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct SelectionController<W: WatchRegistry, O: PanelObserver> {
    loader: ModuleLoader,
    executor: PlotExecutor,
    scheduler: DebounceScheduler<PathBuf>,
    watcher: W,
    observer: O,
    state: ControllerState,
    active: Option<PathBuf>,
    /// The path the watch registry accepted, if any.
    watched: Option<PathBuf>,
    namespace: Option<Namespace>,
    figures: FigureList,
    selection: Option<String>,
    /// Bumped whenever the active file changes.
    generation: u64,
    in_flight: Option<ReloadTicket>,
    followup: bool,
    /// The pending load is the first one for a newly selected file.
    fresh_file: bool,
}

impl<W: WatchRegistry, O: PanelObserver> SelectionController<W, O> {
    pub fn new(settings: &Settings, backend: Box<dyn RenderBackend>, watcher: W, observer: O) -> Self {
        Self {
            loader: ModuleLoader::new(settings),
            executor: PlotExecutor::new(settings, backend),
            scheduler: DebounceScheduler::new(settings.quiet_period(), settings.debounce_policy),
            watcher,
            observer,
            state: ControllerState::Idle,
            active: None,
            watched: None,
            namespace: None,
            figures: FigureList::default(),
            selection: None,
            generation: 0,
            in_flight: None,
            followup: false,
            fresh_file: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_deref()
    }

    pub fn figures(&self) -> &FigureList {
        &self.figures
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn surface(&self) -> &FigureHandle {
        self.executor.surface()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn watcher(&self) -> &W {
        &self.watcher
    }

    pub fn in_flight(&self) -> Option<&ReloadTicket> {
        self.in_flight.as_ref()
    }

    pub fn followup_pending(&self) -> bool {
        self.followup
    }

    /// The path currently registered with the watch registry.
    pub fn watched_path(&self) -> Option<&Path> {
        self.watched.as_deref()
    }

    /// Make `path` the active file and load it.
    ///
    /// The previously watched file is unwatched before the new one is watched.
    /// A path whose watch failed is never unwatched. A watch error is returned
    /// after the switch and the load have completed.
    pub fn select_file(&mut self, path: &Path) -> Result<(), WatchError> {
        let previous = self.active.take();
        if let Some(old) = &previous {
            self.scheduler.cancel(old);
        }
        self.generation += 1;
        self.in_flight = None;
        self.followup = false;
        self.fresh_file = previous.as_deref() != Some(path);

        let mut watch_result = Ok(());
        if let Some(old) = self.watched.take() {
            if let Err(e) = self.watcher.unwatch(&old) {
                log::warn!("Failed to unwatch {}: {}", old.display(), e);
                watch_result = Err(e);
            }
        }
        match self.watcher.watch(path) {
            Ok(()) => self.watched = Some(path.to_path_buf()),
            Err(e) => {
                log::warn!("Failed to watch {}: {}", path.display(), e);
                if watch_result.is_ok() {
                    watch_result = Err(e);
                }
            }
        }

        log::info!("Active file: {}", path.display());
        self.active = Some(path.to_path_buf());
        self.reload_now(path);
        watch_result
    }

    /// Directory picks carry no meaning for the pipeline.
    pub fn directory_selected(&mut self, path: &Path) {
        log::debug!("Ignoring directory selection {}", path.display());
    }

    /// Record a change notification. Only the active file arms a timer.
    pub fn notify_change(&mut self, path: &Path, now: Instant) {
        if self.active.as_deref() != Some(path) {
            log::trace!("Ignoring change to inactive path {}", path.display());
            return;
        }
        if self.scheduler.notify(path.to_path_buf(), now) {
            log::debug!("Change detected in {}, reload scheduled", path.display());
        }
    }

    /// Deliver every debounce timer that is due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for path in self.scheduler.fire_due(now) {
            self.file_changed(&path);
        }
    }

    /// When the next debounce timer is due, for the host loop's timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Reload the active file, keeping the selection by name.
    pub fn file_changed(&mut self, path: &Path) {
        if self.active.as_deref() != Some(path) {
            log::debug!("Ignoring change to inactive path {}", path.display());
            return;
        }
        self.reload_now(path);
    }

    /// Select and render a figure by name. Unknown names are ignored.
    pub fn select_figure(&mut self, name: &str) {
        if !self.figures.contains(name) {
            log::debug!("No figure named {}", name);
            return;
        }
        self.selection = Some(name.to_string());
        self.render_selected();
    }

    /// Start a reload of `path`. Returns `None` when `path` is not the active
    /// file, or when a reload is already in flight; in that case exactly one
    /// follow-up reload is queued.
    ///
    /// Every ticket must be handed back through [`complete_reload`]. Until it
    /// is, change notifications only queue the follow-up and nothing reloads.
    /// Selecting a file abandons any outstanding ticket.
    ///
    /// [`complete_reload`]: SelectionController::complete_reload
    pub fn begin_reload(&mut self, path: &Path) -> Option<ReloadTicket> {
        if self.active.as_deref() != Some(path) {
            return None;
        }
        if self.in_flight.is_some() {
            if !self.followup {
                log::debug!("Reload of {} in flight, queueing one more", path.display());
            }
            self.followup = true;
            return None;
        }
        let ticket = ReloadTicket {
            path: path.to_path_buf(),
            generation: self.generation,
        };
        self.in_flight = Some(ticket.clone());
        Some(ticket)
    }

    /// Finish a reload. Stale tickets are dropped. If a follow-up was queued
    /// the result is discarded and the follow-up ticket is returned.
    pub fn complete_reload(&mut self, ticket: ReloadTicket, result: LoadResult) -> Option<ReloadTicket> {
        if ticket.generation != self.generation {
            log::debug!("Discarding stale reload of {}", ticket.path.display());
            return None;
        }
        if self.in_flight.as_ref() != Some(&ticket) {
            log::warn!("Ignoring completion of a reload that is not in flight: {}", ticket.path.display());
            return None;
        }
        self.in_flight = None;

        if std::mem::take(&mut self.followup) {
            log::debug!("Reload of {} superseded by a newer change", ticket.path.display());
            self.in_flight = Some(ticket.clone());
            return Some(ticket);
        }

        self.apply_load(result);
        None
    }

    fn reload_now(&mut self, path: &Path) {
        let Some(mut ticket) = self.begin_reload(path) else {
            if let Some(pending) = &self.in_flight {
                log::warn!(
                    "Reload of {} is waiting on an uncompleted ticket (generation {})",
                    pending.path.display(),
                    pending.generation
                );
            }
            return;
        };
        loop {
            let result = self.loader.load(&ticket.path);
            match self.complete_reload(ticket, result) {
                Some(next) => ticket = next,
                None => break,
            }
        }
    }

    fn apply_load(&mut self, result: LoadResult) {
        let fresh_file = std::mem::take(&mut self.fresh_file);
        match result {
            Ok(namespace) => {
                self.forward_output(namespace.output());
                self.observer.output(&PanelMessage::LoadSucceeded);

                let previous = self.selection.take();
                let (figures, selection) = reconcile(FigureList::build(&namespace), previous.as_deref());
                log::info!(
                    "{}: {} figures, selection {:?}",
                    namespace.origin(),
                    figures.len(),
                    selection
                );
                self.figures = figures;
                self.selection = selection;
                self.namespace = Some(namespace);
                self.state = ControllerState::Loaded;
                self.observer
                    .figure_list_replaced(&self.figures, self.selection.as_deref());

                self.render_selected();
            }
            Err(e) => {
                self.forward_output(e.output());
                log::warn!("Load failed: {}", e);
                self.observer.output(&PanelMessage::LoadFailed {
                    message: e.to_string(),
                });
                self.state = ControllerState::LoadFailed;

                // The old list belonged to another file.
                if fresh_file {
                    self.figures = FigureList::default();
                    self.selection = None;
                    self.namespace = None;
                    self.observer.figure_list_replaced(&self.figures, None);
                }
            }
        }
    }

    fn render_selected(&mut self) {
        let Some(entry) = self
            .selection
            .as_deref()
            .and_then(|name| self.figures.get(name))
            .cloned()
        else {
            return;
        };

        match self.executor.run(&entry) {
            Ok(report) => {
                self.forward_output(&report.output);
                if self.state == ControllerState::Loaded {
                    self.state = ControllerState::Rendering;
                }
                self.observer.rendered(entry.name());
            }
            Err(e) => {
                self.forward_output(&e.output);
                self.observer.output(&PanelMessage::ExecutionFailed {
                    figure: e.figure.clone(),
                    message: e.diagnostic.to_string(),
                });
                if self.state == ControllerState::Rendering {
                    self.state = ControllerState::Loaded;
                }
            }
        }
    }

    fn forward_output(&mut self, lines: &[String]) {
        for line in lines {
            self.observer.output(&PanelMessage::ScriptOutput(line.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NullBackend;
    use std::io::Write;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        messages: Vec<PanelMessage>,
        lists: Vec<(Vec<String>, Option<String>)>,
        rendered: Vec<String>,
    }

    impl PanelObserver for Recorder {
        fn output(&mut self, message: &PanelMessage) {
            self.messages.push(message.clone());
        }

        fn figure_list_replaced(&mut self, list: &FigureList, selection: Option<&str>) {
            let names = list.names().into_iter().map(String::from).collect();
            self.lists.push((names, selection.map(String::from)));
        }

        fn rendered(&mut self, name: &str) {
            self.rendered.push(name.to_string());
        }
    }

    /// Registry that behaves like the real one: unknown paths cannot be
    /// unwatched. Paths in `refuse` fail to register.
    #[derive(Default)]
    struct FakeWatcher {
        watched: Vec<PathBuf>,
        calls: Vec<String>,
        refuse: Vec<PathBuf>,
    }

    impl WatchRegistry for FakeWatcher {
        fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
            self.calls.push(format!("watch {}", path.display()));
            if self.refuse.iter().any(|p| p == path) {
                return Err(WatchError::NotWatched(path.to_path_buf()));
            }
            self.watched.push(path.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
            self.calls.push(format!("unwatch {}", path.display()));
            if !self.watched.iter().any(|p| p == path) {
                return Err(WatchError::NotWatched(path.to_path_buf()));
            }
            self.watched.retain(|p| p != path);
            Ok(())
        }
    }

    fn controller() -> SelectionController<FakeWatcher, Recorder> {
        SelectionController::new(
            &Settings::default(),
            Box::new(NullBackend),
            FakeWatcher::default(),
            Recorder::default(),
        )
    }

    fn write(path: &Path, source: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(source.as_bytes()).unwrap();
    }

    #[test]
    fn test_starts_idle() {
        let c = controller();
        assert_eq!(c.state(), ControllerState::Idle);
        assert!(c.figures().is_empty());
        assert_eq!(c.selection(), None);
    }

    #[test]
    fn test_select_file_watches_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        let b = dir.path().join("b.rhai");
        write(&a, "fn fig_one(fig) { }");
        write(&b, "fn fig_two(fig) { }");

        let mut c = controller();
        c.select_file(&a).unwrap();
        assert_eq!(c.state(), ControllerState::Loaded);
        assert_eq!(c.figures().names(), vec!["fig_one"]);
        assert_eq!(c.observer().messages, vec![PanelMessage::LoadSucceeded]);

        c.select_file(&b).unwrap();
        assert_eq!(c.active_path(), Some(b.as_path()));
        assert_eq!(c.watcher().watched, vec![b.clone()]);
        assert_eq!(
            c.watcher().calls,
            vec![
                format!("watch {}", a.display()),
                format!("unwatch {}", a.display()),
                format!("watch {}", b.display()),
            ]
        );
    }

    #[test]
    fn test_failed_watch_is_not_unwatched_later() {
        let dir = tempfile::tempdir().unwrap();
        let unwatchable = dir.path().join("missing").join("x.rhai");
        let good = dir.path().join("good.rhai");
        write(&good, "fn fig_one(fig) { }");

        let mut c = controller();
        c.watcher.refuse.push(unwatchable.clone());
        assert!(c.select_file(&unwatchable).is_err());
        assert_eq!(c.watched_path(), None);

        c.select_file(&good).unwrap();
        assert_eq!(c.watched_path(), Some(good.as_path()));
        assert_eq!(c.watcher().watched, vec![good.clone()]);
        assert_eq!(
            c.watcher().calls,
            vec![
                format!("watch {}", unwatchable.display()),
                format!("watch {}", good.display()),
            ]
        );
    }

    #[test]
    fn test_uncompleted_ticket_holds_back_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        write(&a, "fn fig_one(fig) { }");

        let mut c = controller();
        c.select_file(&a).unwrap();
        let ticket = c.begin_reload(&a).unwrap();

        write(&a, "fn fig_one(fig) { } fn fig_two(fig) { }");
        c.file_changed(&a);
        assert_eq!(c.figures().names(), vec!["fig_one"]);
        assert!(c.followup_pending());

        let result = ModuleLoader::new(&Settings::default()).load(&a);
        let next = c.complete_reload(ticket, result).unwrap();
        let result = ModuleLoader::new(&Settings::default()).load(&a);
        assert!(c.complete_reload(next, result).is_none());
        assert_eq!(c.figures().names(), vec!["fig_one", "fig_two"]);

        // Selecting a file drops an abandoned ticket.
        let _abandoned = c.begin_reload(&a).unwrap();
        c.select_file(&a).unwrap();
        assert!(c.in_flight().is_none());
        assert_eq!(c.state(), ControllerState::Loaded);
    }

    #[test]
    fn test_changes_to_other_paths_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        write(&a, "fn fig_one(fig) { }");

        let mut c = controller();
        c.select_file(&a).unwrap();
        let now = Instant::now();
        c.notify_change(&dir.path().join("other.rhai"), now);
        assert_eq!(c.next_deadline(), None);

        c.notify_change(&a, now);
        assert_eq!(c.next_deadline(), Some(now + Duration::from_millis(250)));
    }

    #[test]
    fn test_select_figure_renders_and_ignores_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        write(&a, "fn fig_one(fig) { fig.plot([1, 2]); }");

        let mut c = controller();
        c.select_file(&a).unwrap();
        c.select_figure("fig_missing");
        assert_eq!(c.selection(), None);
        assert!(c.observer().rendered.is_empty());

        c.select_figure("fig_one");
        assert_eq!(c.selection(), Some("fig_one"));
        assert_eq!(c.state(), ControllerState::Rendering);
        assert_eq!(c.observer().rendered, vec!["fig_one".to_string()]);
        assert_eq!(c.surface().borrow().artists().len(), 1);
    }

    #[test]
    fn test_failed_first_load_of_new_file_clears_list() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.rhai");
        let bad = dir.path().join("bad.rhai");
        write(&good, "fn fig_one(fig) { }");
        write(&bad, "fn fig_one(fig) {");

        let mut c = controller();
        c.select_file(&good).unwrap();
        c.select_figure("fig_one");
        c.select_file(&bad).unwrap();

        assert_eq!(c.state(), ControllerState::LoadFailed);
        assert!(c.figures().is_empty());
        assert_eq!(c.selection(), None);
        assert_eq!(c.observer().lists.last(), Some(&(Vec::new(), None)));
        assert!(matches!(
            c.observer().messages.last(),
            Some(PanelMessage::LoadFailed { .. })
        ));
    }

    #[test]
    fn test_execution_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        write(&a, r#"fn fig_bad(fig) { print("partial"); throw "nope"; }"#);

        let mut c = controller();
        c.select_file(&a).unwrap();
        c.select_figure("fig_bad");

        assert_eq!(c.state(), ControllerState::Loaded);
        assert_eq!(c.selection(), Some("fig_bad"));
        let messages = &c.observer().messages;
        assert_eq!(messages[messages.len() - 2], PanelMessage::ScriptOutput("[INFO] partial".into()));
        match &messages[messages.len() - 1] {
            PanelMessage::ExecutionFailed { figure, message } => {
                assert_eq!(figure, "fig_bad");
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_followup_discards_in_flight_result() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        write(&a, "fn fig_one(fig) { }");

        let mut c = controller();
        c.select_file(&a).unwrap();

        let ticket = c.begin_reload(&a).unwrap();
        assert!(c.begin_reload(&a).is_none());
        assert!(c.begin_reload(&a).is_none());
        assert!(c.followup_pending());

        let stale = ModuleLoader::new(&Settings::default()).load_source("fn fig_stale(fig) { }", "old");
        let next = c.complete_reload(ticket, stale).unwrap();
        assert_eq!(c.figures().names(), vec!["fig_one"]);
        assert!(!c.followup_pending());

        let fresh = ModuleLoader::new(&Settings::default()).load_source("fn fig_new(fig) { }", "new");
        assert!(c.complete_reload(next, fresh).is_none());
        assert_eq!(c.figures().names(), vec!["fig_new"]);
        assert!(c.in_flight().is_none());
    }

    #[test]
    fn test_stale_ticket_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rhai");
        let b = dir.path().join("b.rhai");
        write(&a, "fn fig_a(fig) { }");
        write(&b, "fn fig_b(fig) { }");

        let mut c = controller();
        c.select_file(&a).unwrap();
        let ticket = c.begin_reload(&a).unwrap();

        c.select_file(&b).unwrap();
        let late = ModuleLoader::new(&Settings::default()).load(&a);
        assert!(c.complete_reload(ticket, late).is_none());
        assert_eq!(c.figures().names(), vec!["fig_b"]);
    }

    #[test]
    fn test_panel_message_text() {
        assert_eq!(PanelMessage::LoadSucceeded.to_string(), "load succeeded");
        assert_eq!(
            PanelMessage::ExecutionFailed {
                figure: "fig_a".into(),
                message: "boom".into()
            }
            .to_string(),
            "fig_a failed: boom"
        );
    }
}
