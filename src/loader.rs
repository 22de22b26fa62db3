//! Dynamic loading of figure scripts.
//!
//! Every load compiles the file from scratch and runs its top level in a
//! brand-new `Scope`, so nothing from a previous version of the script can
//! leak into the new one. The resulting bindings (top-level variables and
//! script functions) form a [`Namespace`].
//!
//! Loading never fails loudly: a missing file, a syntax error or an error
//! raised by top-level code all come back as a [`LoadError`], because a
//! half-edited script is the normal case while someone is working on it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rhai::{CallFnOptions, Dynamic, Engine, FnPtr, Scope, AST};
use thiserror::Error;

use crate::figure::FigureHandle;
use crate::figure_rhai::register_figure_api;
use crate::result_cache::register_result_cache;
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};
use crate::script_log::{begin_run, register_script_log, take_script_output};
use crate::settings::Settings;

/// Outcome of one load: a populated namespace or a captured failure.
pub type LoadResult = Result<Namespace, LoadError>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}: {diagnostic}")]
    Parse {
        origin: String,
        diagnostic: ScriptDiagnostic,
    },

    #[error("{origin}: {diagnostic}")]
    Runtime {
        origin: String,
        diagnostic: ScriptDiagnostic,
        /// Script output produced before the error.
        output: Vec<String>,
    },
}

impl LoadError {
    pub fn diagnostic(&self) -> Option<&ScriptDiagnostic> {
        match self {
            LoadError::Io { .. } => None,
            LoadError::Parse { diagnostic, .. } | LoadError::Runtime { diagnostic, .. } => Some(diagnostic),
        }
    }

    pub fn output(&self) -> &[String] {
        match self {
            LoadError::Runtime { output, .. } => output,
            _ => &[],
        }
    }
}

/// One top-level binding of a loaded script.
#[derive(Debug, Clone)]
pub enum Binding {
    /// A script function; one entry per overload arity.
    Function { arities: Vec<usize> },
    /// A function pointer or closure stored in a variable.
    Pointer(FnPtr),
    /// Any other value (maps, numbers, arrays, ...).
    Value(Dynamic),
}

/// Compiled script plus the scope its top level left behind.
///
/// Routines taken from a namespace keep the module alive through an `Rc`,
/// so a figure entry stays callable until the namespace is replaced.
pub struct ScriptModule {
    engine: Rc<Engine>,
    ast: AST,
    scope: RefCell<Scope<'static>>,
    origin: String,
}

impl fmt::Debug for ScriptModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptModule")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl ScriptModule {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Call the one-argument script function `name` with the surface.
    pub fn call_function(&self, name: &str, surface: &FigureHandle) -> Result<(), ScriptDiagnostic> {
        // The top level already ran at load time; do not run it again per call.
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let mut scope = self.scope.borrow_mut();
        self.engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut *scope,
                &self.ast,
                name,
                (Dynamic::from(surface.clone()),),
            )
            .map(|_| ())
            .map_err(|e| from_eval_error(ScriptPhase::Render, &e))
    }

    /// Call a function pointer or closure with the surface.
    pub fn call_pointer(&self, pointer: &FnPtr, surface: &FigureHandle) -> Result<(), ScriptDiagnostic> {
        pointer
            .call::<Dynamic>(&self.engine, &self.ast, (Dynamic::from(surface.clone()),))
            .map(|_| ())
            .map_err(|e| from_eval_error(ScriptPhase::Render, &e))
    }
}

/// The bindings produced by one load. Rebuilt wholesale on every reload.
#[derive(Debug, Clone)]
pub struct Namespace {
    module: Rc<ScriptModule>,
    bindings: BTreeMap<String, Binding>,
    output: Vec<String>,
}

impl Namespace {
    pub fn origin(&self) -> &str {
        self.module.origin()
    }

    pub fn module(&self) -> &Rc<ScriptModule> {
        &self.module
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.bindings.iter().map(|(name, binding)| (name.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Script output produced while the top level ran.
    pub fn output(&self) -> &[String] {
        &self.output
    }
}

fn build_engine(settings: &Settings) -> Engine {
    let mut engine = Engine::new();

    // Sandbox settings
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_operations(settings.max_operations); // Prevent infinite loops
    engine.set_max_string_size(100_000);
    engine.set_max_array_size(settings.max_array_size);
    engine.set_max_map_size(10_000);

    register_script_log(&mut engine);
    register_figure_api(&mut engine);
    register_result_cache(&mut engine);

    engine
}

/// Loads figure scripts. Holds the engine (registered host API only, no
/// script state) and hands it to every namespace it produces.
pub struct ModuleLoader {
    engine: Rc<Engine>,
}

impl ModuleLoader {
    pub fn new(settings: &Settings) -> Self {
        Self {
            engine: Rc::new(build_engine(settings)),
        }
    }

    /// Read and load the script at `path`.
    pub fn load(&self, path: &Path) -> LoadResult {
        begin_run();
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_source(&source, &path.display().to_string())
    }

    /// Load script text directly; `origin` names it in messages.
    pub fn load_source(&self, source: &str, origin: &str) -> LoadResult {
        begin_run();

        let ast = self.engine.compile(source).map_err(|e| LoadError::Parse {
            origin: origin.to_string(),
            diagnostic: from_parse_error(&e),
        })?;

        let mut scope = Scope::new();
        if let Err(e) = self.engine.run_ast_with_scope(&mut scope, &ast) {
            return Err(LoadError::Runtime {
                origin: origin.to_string(),
                diagnostic: from_eval_error(ScriptPhase::Load, &e),
                output: take_script_output(),
            });
        }

        let bindings = collect_bindings(&ast, &scope);
        log::info!(
            "Loaded {}: {} bindings ({} script functions)",
            origin,
            bindings.len(),
            bindings
                .values()
                .filter(|b| matches!(b, Binding::Function { .. }))
                .count()
        );

        Ok(Namespace {
            module: Rc::new(ScriptModule {
                engine: Rc::clone(&self.engine),
                ast,
                scope: RefCell::new(scope),
                origin: origin.to_string(),
            }),
            bindings,
            output: take_script_output(),
        })
    }
}

/// Gather script functions, then top-level variables. A variable shadows a
/// function of the same name, and a later `let` shadows an earlier one.
fn collect_bindings(ast: &AST, scope: &Scope) -> BTreeMap<String, Binding> {
    let mut bindings: BTreeMap<String, Binding> = BTreeMap::new();

    for meta in ast.iter_functions() {
        let arity = meta.params.len();
        match bindings.get_mut(meta.name) {
            Some(Binding::Function { arities }) => arities.push(arity),
            _ => {
                bindings.insert(
                    meta.name.to_string(),
                    Binding::Function {
                        arities: vec![arity],
                    },
                );
            }
        }
    }

    for (name, _is_const, value) in scope.iter() {
        // Variables captured by closures are shared; look at the inner value.
        let value = value.flatten();
        let binding = match value.clone().try_cast::<FnPtr>() {
            Some(pointer) => Binding::Pointer(pointer),
            None => Binding::Value(value),
        };
        bindings.insert(name.to_string(), binding);
    }

    bindings
}
