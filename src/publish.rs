//! Batch publishing of figures.
//!
//! A publish job loads one script, resolves the requested figure names
//! (`all` expands to every figure), renders each through the same executor
//! the interactive session uses, and writes `<display name>.<ext>` files plus
//! a `publish.json` metadata record into the output directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::executor::{NullBackend, PlotExecutor};
use crate::loader::ModuleLoader;
use crate::raster::{export, OutputFormat};
use crate::registry::{FigureEntry, FigureList};
use crate::settings::Settings;

/// Name of the metadata file written next to the published figures.
pub const METADATA_FILE: &str = "publish.json";

/// Pseudo figure name selecting every figure.
pub const ALL_FIGURES: &str = "all";

fn default_figures() -> Vec<String> {
    vec![ALL_FIGURES.to_string()]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Specification for one publish run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishJobSpec {
    /// Path to the Rhai script.
    pub script_path: PathBuf,

    /// Figure names or display names; `all` selects every figure.
    #[serde(default = "default_figures")]
    pub figures: Vec<String>,

    /// Output directory, created if missing.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,

    /// Draw every figure into the same surface instead of a fresh one each.
    #[serde(default)]
    pub reuse_window: bool,

    /// Overrides the configured resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<f32>,
}

impl PublishJobSpec {
    pub fn new(script_path: PathBuf, figures: Vec<String>, output_dir: PathBuf) -> Self {
        Self {
            script_path,
            figures,
            output_dir,
            format: OutputFormat::default(),
            reuse_window: false,
            dpi: None,
        }
    }

    /// Load a job spec from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read job file {:?}: {}", path, e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse job file {:?}: {}", path, e))
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.script_path.exists() {
            return Err(format!("Script file not found: {:?}", self.script_path));
        }
        if self.figures.is_empty() {
            return Err("At least one figure name is required".to_string());
        }
        if let Some(dpi) = self.dpi {
            if !(dpi > 0.0) {
                return Err("DPI must be positive".to_string());
            }
        }
        Ok(())
    }
}

/// Map requested names to entries. Unknown names are rejected up front so
/// nothing is published when the request has a typo.
pub fn resolve_figures<'a>(list: &'a FigureList, requested: &[String]) -> Result<Vec<&'a FigureEntry>, String> {
    if requested.iter().any(|name| name == ALL_FIGURES) {
        return Ok(list.entries().iter().collect());
    }

    let mut entries: Vec<&FigureEntry> = Vec::new();
    for name in requested {
        let entry = list.resolve(name).ok_or_else(|| {
            let mut choices = vec![ALL_FIGURES];
            choices.extend(list.entries().iter().map(|e| e.display_name()));
            format!("unknown figure '{}' (choose from: {})", name, choices.join(", "))
        })?;
        if !entries.iter().any(|e| e.name() == entry.name()) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// File name for a published figure.
fn output_file_name(entry: &FigureEntry, format: OutputFormat) -> String {
    let stem: String = entry
        .display_name()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    format!("{}.{}", stem, format.extension())
}

/// Result of publishing one figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FigureOutcome {
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub render_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metadata for a completed publish run, written as `publish.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMetadata {
    /// The job specification used.
    pub job: PublishJobSpec,

    /// Timestamp when publishing started (ISO 8601).
    pub started_at: DateTime<Utc>,

    /// Timestamp when publishing completed (ISO 8601).
    pub completed_at: DateTime<Utc>,

    pub duration_secs: f64,

    /// SHA-256 hash of the script content.
    pub script_hash: String,

    pub figwatch_version: String,

    pub figures: Vec<FigureOutcome>,

    /// Script output and other non-fatal notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PublishMetadata {
    /// Compute SHA-256 hash of file content.
    pub fn hash_file(path: &Path) -> Result<String, std::io::Error> {
        use std::io::Read;

        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize metadata: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write metadata: {}", e))
    }

    pub fn failed(&self) -> impl Iterator<Item = &FigureOutcome> {
        self.figures.iter().filter(|f| f.error.is_some())
    }
}

/// Run a publish job. Individual figure failures are recorded in the returned
/// metadata; only setup problems (bad job, unloadable script, unknown names,
/// unwritable output) are errors.
pub fn run_publish(job: &PublishJobSpec, settings: &Settings) -> Result<PublishMetadata> {
    job.validate().map_err(|e| anyhow!(e))?;

    let mut settings = settings.clone();
    if let Some(dpi) = job.dpi {
        settings.dpi = dpi;
    }

    let started_at = Utc::now();
    let started = Instant::now();
    let script_hash = PublishMetadata::hash_file(&job.script_path)
        .with_context(|| format!("hashing {}", job.script_path.display()))?;

    let namespace = ModuleLoader::new(&settings)
        .load(&job.script_path)
        .map_err(|e| anyhow!("loading script: {}", e))?;
    let mut warnings: Vec<String> = namespace.output().to_vec();
    let list = FigureList::build(&namespace);
    let entries = resolve_figures(&list, &job.figures).map_err(|e| anyhow!(e))?;

    std::fs::create_dir_all(&job.output_dir)
        .with_context(|| format!("creating {}", job.output_dir.display()))?;

    let mut shared = job
        .reuse_window
        .then(|| PlotExecutor::new(&settings, Box::new(NullBackend)));
    let mut figures = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut fresh;
        let executor = match shared.as_mut() {
            Some(executor) => executor,
            None => {
                fresh = PlotExecutor::new(&settings, Box::new(NullBackend));
                &mut fresh
            }
        };

        let path = job.output_dir.join(output_file_name(entry, job.format));
        let figure_started = Instant::now();
        let result = executor.run(entry);
        let mut outcome = FigureOutcome {
            name: entry.name().to_string(),
            display_name: entry.display_name().to_string(),
            output: None,
            render_ms: 0.0,
            error: None,
        };

        match result {
            Ok(report) => {
                warnings.extend(report.output);
                export(&executor.surface().borrow(), settings.dpi, job.format, &path)?;
                log::info!("Published {}", path.display());
                println!("publishing {}", path.display());
                outcome.output = Some(path);
            }
            Err(e) => {
                warnings.extend(e.output.iter().cloned());
                log::error!("{}", e);
                outcome.error = Some(e.diagnostic.to_string());
            }
        }
        outcome.render_ms = figure_started.elapsed().as_secs_f64() * 1000.0;
        figures.push(outcome);
    }

    let metadata = PublishMetadata {
        job: job.clone(),
        started_at,
        completed_at: Utc::now(),
        duration_secs: started.elapsed().as_secs_f64(),
        script_hash,
        figwatch_version: env!("CARGO_PKG_VERSION").to_string(),
        figures,
        warnings,
    };
    metadata
        .save(&job.output_dir.join(METADATA_FILE))
        .map_err(|e| anyhow!(e))?;

    if metadata.failed().next().is_some() {
        bail!(
            "{} of {} figures failed: {}",
            metadata.failed().count(),
            metadata.figures.len(),
            metadata
                .failed()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(metadata)
}
