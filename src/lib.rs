pub mod settings;
pub mod debounce;

// Scripting
pub mod loader;
pub mod script_log;
pub mod script_diagnostics;
pub mod figure_rhai;
pub mod result_cache;

// Figures and rendering
pub mod figure;
pub mod registry;
pub mod executor;
pub mod raster;

// Live reload
pub mod controller;
pub mod watcher;

pub mod publish;
pub mod cli;
