//! Runs one figure routine into the long-lived drawing surface.
//!
//! The executor owns the surface and the rendering backend. Before every run
//! the surface is configured from the entry's hints and cleared in place, so
//! its identity survives any number of runs, reloads and figure switches.
//! Script errors and panics in native routines are caught here and returned
//! as [`ExecutionError`]; nothing escapes to the caller's event loop.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::figure::{Figure, FigureHandle, FigureSize};
use crate::registry::FigureEntry;
use crate::script_diagnostics::{ScriptDiagnostic, ScriptPhase};
use crate::script_log::{begin_run, take_script_output};
use crate::settings::Settings;

/// Where a finished figure goes: a window, an image file, or nowhere.
pub trait RenderBackend {
    /// Resize the output and set its title.
    fn configure(&mut self, size_px: (u32, u32), title: &str);

    /// Drop whatever was shown for the previous run.
    fn clear(&mut self);

    /// Present the figure.
    fn draw(&mut self, figure: &Figure) -> anyhow::Result<()>;
}

/// Backend that discards everything. Used when only the surface matters.
#[derive(Debug, Default)]
pub struct NullBackend;

impl RenderBackend for NullBackend {
    fn configure(&mut self, _size_px: (u32, u32), _title: &str) {}

    fn clear(&mut self) {}

    fn draw(&mut self, _figure: &Figure) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A figure routine failed. The surface keeps whatever it drew before failing.
#[derive(Debug, Error)]
#[error("error while running {figure}: {diagnostic}")]
pub struct ExecutionError {
    pub figure: String,
    pub diagnostic: ScriptDiagnostic,
    /// Script output produced before the failure.
    pub output: Vec<String>,
}

/// What a successful run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub output: Vec<String>,
    pub elapsed: Duration,
}

pub struct PlotExecutor {
    surface: FigureHandle,
    backend: Box<dyn RenderBackend>,
    default_size: FigureSize,
    dpi: f32,
}

impl PlotExecutor {
    pub fn new(settings: &Settings, backend: Box<dyn RenderBackend>) -> Self {
        Self {
            surface: FigureHandle::new(Figure::new(settings.default_size)),
            backend,
            default_size: settings.default_size,
            dpi: settings.dpi,
        }
    }

    /// The surface every run draws into.
    pub fn surface(&self) -> &FigureHandle {
        &self.surface
    }

    pub fn dpi(&self) -> f32 {
        self.dpi
    }

    /// Run `entry` into the surface and hand the result to the backend.
    pub fn run(&mut self, entry: &FigureEntry) -> Result<RunReport, ExecutionError> {
        let started = Instant::now();
        let size = entry.size().unwrap_or(self.default_size);
        let title = entry.display_name().to_string();

        {
            let mut figure = self.surface.borrow_mut();
            figure.configure(size, &title);
            figure.clear();
        }
        self.backend.configure(size.to_pixels(self.dpi), &title);
        self.backend.clear();

        begin_run();
        let routine = entry.routine();
        let surface = &self.surface;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| routine.invoke(surface)));
        let output = take_script_output();

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(ScriptDiagnostic::host_error(
                ScriptPhase::Render,
                format!("routine panicked: {}", panic_message(payload.as_ref())),
            )),
        };
        if let Err(diagnostic) = result {
            log::warn!("{} failed: {}", entry.name(), diagnostic);
            return Err(ExecutionError {
                figure: entry.name().to_string(),
                diagnostic,
                output,
            });
        }

        let figure = self.surface.borrow();
        if let Err(e) = self.backend.draw(&figure) {
            return Err(ExecutionError {
                figure: entry.name().to_string(),
                diagnostic: ScriptDiagnostic::host_error(ScriptPhase::Render, format!("{:#}", e)),
                output,
            });
        }

        let elapsed = started.elapsed();
        log::debug!(
            "Rendered {} ({} artists) in {:.1}ms",
            entry.name(),
            figure.artists().len(),
            elapsed.as_secs_f64() * 1000.0
        );
        Ok(RunReport { output, elapsed })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
