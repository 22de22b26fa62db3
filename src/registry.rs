//! Figure discovery and selection reconciliation.
//!
//! A binding is a figure routine when its name starts with `fig_` and it can
//! be called with a single surface argument. Entries are identified by name
//! only: after a reload every entry object is new, and the previous selection
//! is carried over purely by string equality.

use std::fmt;
use std::rc::Rc;

use rhai::{Dynamic, FnPtr, Map};

use crate::figure::{Figure, FigureHandle, FigureSize};
use crate::loader::{Binding, Namespace, ScriptModule};
use crate::script_diagnostics::{ScriptDiagnostic, ScriptDiagnosticKind, ScriptPhase};

/// Name prefix that marks a binding as a figure routine.
pub const FIGURE_PREFIX: &str = "fig_";

/// Anything that can draw into the surface.
pub trait FigureRoutine {
    fn invoke(&self, surface: &FigureHandle) -> Result<(), ScriptDiagnostic>;
}

#[derive(Debug, Clone)]
enum ScriptTarget {
    Function(String),
    Pointer(FnPtr),
}

/// A routine defined by a loaded script.
#[derive(Debug, Clone)]
pub struct ScriptRoutine {
    module: Rc<ScriptModule>,
    target: ScriptTarget,
}

impl FigureRoutine for ScriptRoutine {
    fn invoke(&self, surface: &FigureHandle) -> Result<(), ScriptDiagnostic> {
        match &self.target {
            ScriptTarget::Function(name) => self.module.call_function(name, surface),
            ScriptTarget::Pointer(pointer) => self.module.call_pointer(pointer, surface),
        }
    }
}

/// A routine written in Rust. Used by hosts that register built-in figures.
pub struct NativeRoutine<F>(pub F);

impl<F> FigureRoutine for NativeRoutine<F>
where
    F: Fn(&mut Figure) -> Result<(), String>,
{
    fn invoke(&self, surface: &FigureHandle) -> Result<(), ScriptDiagnostic> {
        let mut figure = surface.borrow_mut();
        (self.0)(&mut figure).map_err(|message| ScriptDiagnostic {
            kind: ScriptDiagnosticKind::RuntimeError,
            phase: ScriptPhase::Render,
            message,
            location: None,
        })
    }
}

/// A named routine plus its optional presentation hints.
#[derive(Clone)]
pub struct FigureEntry {
    name: String,
    display_name: Option<String>,
    size: Option<FigureSize>,
    routine: Rc<dyn FigureRoutine>,
}

impl fmt::Debug for FigureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FigureEntry")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl FigureEntry {
    pub fn new(name: impl Into<String>, routine: Rc<dyn FigureRoutine>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            size: None,
            routine,
        }
    }

    /// Entry backed by a Rust closure.
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Figure) -> Result<(), String> + 'static,
    {
        Self::new(name, Rc::new(NativeRoutine(f)))
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_size(mut self, size: FigureSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The override if one was given, otherwise the binding name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn size(&self) -> Option<FigureSize> {
        self.size
    }

    pub fn routine(&self) -> &Rc<dyn FigureRoutine> {
        &self.routine
    }
}

/// Figure entries of one namespace, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct FigureList {
    entries: Vec<FigureEntry>,
}

impl FigureList {
    /// Collect every `fig_` binding of `namespace` that is callable.
    pub fn build(namespace: &Namespace) -> Self {
        let entries = namespace
            .iter()
            .filter(|(name, _)| name.starts_with(FIGURE_PREFIX))
            .filter_map(|(name, binding)| entry_from_binding(namespace.module(), name, binding))
            .collect();
        Self::from_entries(entries)
    }

    /// Sort entries by name. When two share a name, the later one wins.
    pub fn from_entries(entries: Vec<FigureEntry>) -> Self {
        let mut entries = entries;
        entries.reverse();
        // Stable sort keeps the later duplicate first; dedup then drops the earlier one.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.dedup_by(|later, earlier| later.name == earlier.name);
        Self { entries }
    }

    pub fn entries(&self) -> &[FigureEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&FigureEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look an entry up by binding name, falling back to display name.
    pub fn resolve(&self, name: &str) -> Option<&FigureEntry> {
        self.get(name)
            .or_else(|| self.entries.iter().find(|e| e.display_name() == name))
    }
}

/// Carry the previous selection over to a freshly built list, by name.
pub fn reconcile(new_list: FigureList, previous: Option<&str>) -> (FigureList, Option<String>) {
    let selection = previous
        .filter(|name| new_list.contains(name))
        .map(str::to_string);
    (new_list, selection)
}

fn entry_from_binding(module: &Rc<ScriptModule>, name: &str, binding: &Binding) -> Option<FigureEntry> {
    let script_entry = |target: ScriptTarget| {
        FigureEntry::new(
            name,
            Rc::new(ScriptRoutine {
                module: Rc::clone(module),
                target,
            }),
        )
    };

    match binding {
        Binding::Function { arities } if arities.contains(&1) => {
            Some(script_entry(ScriptTarget::Function(name.to_string())))
        }
        Binding::Function { arities } => {
            log::debug!("Skipping {}: takes {:?} parameters, expected 1", name, arities);
            None
        }
        Binding::Pointer(pointer) => Some(script_entry(ScriptTarget::Pointer(pointer.clone()))),
        Binding::Value(value) => {
            let map = value.clone().try_cast::<Map>()?;
            let draw = map
                .get("draw")
                .and_then(|d| d.clone().flatten().try_cast::<FnPtr>());
            let Some(draw) = draw else {
                log::debug!("Skipping {}: map has no draw closure", name);
                return None;
            };

            let mut entry = script_entry(ScriptTarget::Pointer(draw));
            if let Some(display_name) = map.get("name") {
                match display_name.clone().into_string() {
                    Ok(s) => entry = entry.with_display_name(s),
                    Err(t) => log::warn!("{}: ignoring name hint of type {}", name, t),
                }
            }
            if let Some(size) = map.get("size") {
                match parse_size_hint(size) {
                    Some(size) => entry = entry.with_size(size),
                    None => log::warn!("{}: ignoring malformed size hint {}", name, size),
                }
            }
            Some(entry)
        }
    }
}

/// A size hint is a two-element array of positive numbers.
fn parse_size_hint(value: &Dynamic) -> Option<FigureSize> {
    let values = value.clone().try_cast::<rhai::Array>()?;
    if values.len() != 2 {
        return None;
    }
    let number = |v: &Dynamic| {
        v.as_float()
            .map(|f| f as f32)
            .or_else(|_| v.as_int().map(|i| i as f32))
            .ok()
    };
    let size = FigureSize::new(number(&values[0])?, number(&values[1])?);
    size.is_valid().then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModuleLoader;
    use crate::settings::Settings;

    fn build(source: &str) -> FigureList {
        let ns = ModuleLoader::new(&Settings::default())
            .load_source(source, "inline")
            .unwrap();
        FigureList::build(&ns)
    }

    fn noop(name: &str) -> FigureEntry {
        FigureEntry::native(name, |_| Ok(()))
    }

    #[test]
    fn test_prefix_and_order() {
        let list = build(
            r#"
            fn fig_b(fig) { }
            fn fig_a(fig) { }
            fn helper(fig) { }
            fn Fig_upper(fig) { }
            let fig_c = |fig| { };
            "#,
        );
        assert_eq!(list.names(), vec!["fig_a", "fig_b", "fig_c"]);
    }

    #[test]
    fn test_non_callable_bindings_skipped() {
        let list = build(
            r#"
            let fig_count = 3;
            let fig_data = [1, 2, 3];
            let fig_nodraw = #{ name: "No draw" };
            fn fig_two(fig, extra) { }
            fn fig_ok(fig) { }
            "#,
        );
        assert_eq!(list.names(), vec!["fig_ok"]);
    }

    #[test]
    fn test_overload_with_one_parameter_is_used() {
        let list = build(
            r#"
            fn fig_multi(fig) { }
            fn fig_multi(fig, extra) { }
            "#,
        );
        assert_eq!(list.names(), vec!["fig_multi"]);
    }

    #[test]
    fn test_map_hints() {
        let list = build(
            r#"
            let fig_wave = #{ name: "Wave", size: [6, 3.5], draw: |fig| fig.plot([1]) };
            let fig_bad = #{ size: [0, 3], draw: |fig| fig.plot([1]) };
            "#,
        );

        let wave = list.get("fig_wave").unwrap();
        assert_eq!(wave.display_name(), "Wave");
        assert_eq!(wave.size(), Some(FigureSize::new(6.0, 3.5)));

        let bad = list.get("fig_bad").unwrap();
        assert_eq!(bad.display_name(), "fig_bad");
        assert_eq!(bad.size(), None);
    }

    #[test]
    fn test_entries_invoke_their_routines() {
        let list = build(
            r#"
            fn fig_func(fig) { fig.title("func"); }
            let fig_map = #{ draw: |fig| fig.title("map") };
            "#,
        );

        let surface = FigureHandle::new(Figure::new(FigureSize::new(8.0, 8.0)));
        list.get("fig_func").unwrap().routine().invoke(&surface).unwrap();
        assert_eq!(surface.borrow().title(), Some("func"));
        list.get("fig_map").unwrap().routine().invoke(&surface).unwrap();
        assert_eq!(surface.borrow().title(), Some("map"));
    }

    #[test]
    fn test_resolve_by_display_name() {
        let list = FigureList::from_entries(vec![
            noop("fig_a").with_display_name("Alpha"),
            noop("fig_b"),
        ]);
        assert_eq!(list.resolve("Alpha").map(|e| e.name()), Some("fig_a"));
        assert_eq!(list.resolve("fig_b").map(|e| e.name()), Some("fig_b"));
        assert!(list.resolve("Beta").is_none());
    }

    #[test]
    fn test_later_duplicate_wins() {
        let list = FigureList::from_entries(vec![
            noop("fig_a").with_display_name("first"),
            noop("fig_a").with_display_name("second"),
        ]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].display_name(), "second");
    }

    #[test]
    fn test_reconcile_keeps_existing_name() {
        let list = FigureList::from_entries(vec![noop("fig_a"), noop("fig_b")]);
        let (list, selection) = reconcile(list, Some("fig_b"));
        assert_eq!(selection.as_deref(), Some("fig_b"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_reconcile_clears_missing_name() {
        let list = FigureList::from_entries(vec![noop("fig_a")]);
        let (_, selection) = reconcile(list, Some("fig_gone"));
        assert_eq!(selection, None);

        let list = FigureList::from_entries(vec![noop("fig_a")]);
        let (_, selection) = reconcile(list, None);
        assert_eq!(selection, None);
    }
}
