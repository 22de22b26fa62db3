use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::loader::ModuleLoader;
use crate::publish::{run_publish, PublishJobSpec};
use crate::raster::OutputFormat;
use crate::registry::FigureList;
use crate::settings::Settings;
use crate::watcher::run_watch_session;

#[derive(Parser)]
#[command(author, version, about = "Live-reloading plot scripts", long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the figures a script defines
    List {
        /// Rhai script
        script: PathBuf,
    },

    /// Render figures and publish them to files
    Render {
        /// Rhai script
        #[arg(required_unless_present = "job")]
        script: Option<PathBuf>,

        /// Figure names or display names, or `all`
        #[arg(required_unless_present = "job")]
        figures: Vec<String>,

        /// Output directory
        #[arg(long, short = 'd', default_value = ".")]
        out_dir: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Png)]
        format: OutputFormat,

        /// Draw all figures into one reused surface
        #[arg(long)]
        reuse_window: bool,

        /// Pixels per inch (overrides settings)
        #[arg(long)]
        dpi: Option<f32>,

        /// Publish job file (JSON) instead of the arguments above
        #[arg(long, conflicts_with_all = ["script", "figures"])]
        job: Option<PathBuf>,
    },

    /// Watch a script and re-render the selected figure on every save
    Watch {
        /// Rhai script, or a directory to pick one from
        target: PathBuf,

        /// Figure to select initially
        #[arg(long)]
        figure: Option<String>,

        /// Write every render to this PNG file
        #[arg(long)]
        preview: Option<PathBuf>,

        /// Quiet period before a reload, in milliseconds (overrides settings)
        #[arg(long)]
        quiet_period_ms: Option<u64>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path).map_err(|e| anyhow!(e))?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::List { script } => list_figures(&settings, &script)?,
        Commands::Render {
            script,
            figures,
            out_dir,
            format,
            reuse_window,
            dpi,
            job,
        } => {
            let job = match (job, script) {
                (Some(path), _) => PublishJobSpec::from_file(&path).map_err(|e| anyhow!(e))?,
                (None, Some(script)) => PublishJobSpec {
                    format,
                    reuse_window,
                    dpi,
                    ..PublishJobSpec::new(script, figures, out_dir)
                },
                (None, None) => return Err(anyhow!("a script or --job is required")),
            };
            let metadata = run_publish(&job, &settings)?;
            println!(
                "Published {} figures to {} in {:.2}s",
                metadata.figures.len(),
                job.output_dir.display(),
                metadata.duration_secs
            );
        }
        Commands::Watch {
            target,
            figure,
            preview,
            quiet_period_ms,
        } => {
            if let Some(ms) = quiet_period_ms {
                settings.quiet_period_ms = ms;
            }
            settings.validate().map_err(|e| anyhow!(e))?;
            run_watch_session(&settings, &target, figure.as_deref(), preview)?;
        }
    }
    Ok(())
}

fn list_figures(settings: &Settings, script: &Path) -> Result<()> {
    let namespace = ModuleLoader::new(settings)
        .load(script)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("loading {}", script.display()))?;
    let list = FigureList::build(&namespace);

    if list.is_empty() {
        println!("{}: no figures", script.display());
        return Ok(());
    }
    for entry in list.entries() {
        let size = entry
            .size()
            .map(|s| format!("{}x{} in", s.width, s.height))
            .unwrap_or_else(|| "default size".to_string());
        if entry.display_name() == entry.name() {
            println!("{}  [{}]", entry.name(), size);
        } else {
            println!("{}  \"{}\"  [{}]", entry.name(), entry.display_name(), size);
        }
    }
    Ok(())
}
