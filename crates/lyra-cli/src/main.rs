//! lyra: align a vocal take to a reference and render the correction

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lyra_services::{
    load_user_config, load_user_config_from, write_wav, OutputGuard, OutputPaths, Pipeline, PipelineConfig,
    PresetCatalog, UserConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "lyra")]
#[command(about = "Align a vocal take to a reference performance and correct its timing and pitch")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyse both takes, write a recipe and the corrected vocal
    Run {
        /// Reference performance (a full mix unless --stem is given)
        #[arg(long = "ref")]
        reference: PathBuf,
        /// The new vocal take to correct
        #[arg(long)]
        vocal: PathBuf,
        #[arg(long, default_value = "edited_vocal.wav")]
        out_wav: PathBuf,
        #[arg(long, default_value = "recipe.json")]
        out_recipe: PathBuf,
        /// The reference is already an isolated vocal
        #[arg(long)]
        stem: bool,
        /// Correction preset; defaults to the configured one
        #[arg(long)]
        preset: Option<String>,
        /// Manual global key shift in semitones
        #[arg(long, allow_hyphen_values = true, value_parser = parse_key_shift)]
        key_shift: Option<f64>,
    },
    /// Apply a saved recipe to a vocal take
    Render {
        #[arg(long)]
        recipe: PathBuf,
        #[arg(long)]
        vocal: PathBuf,
        #[arg(long, default_value = "edited_vocal.wav")]
        out_wav: PathBuf,
    },
    /// List the available correction presets
    Presets,
}

fn parse_key_shift(value: &str) -> std::result::Result<f64, String> {
    let shift: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if shift.is_finite() {
        Ok(shift)
    } else {
        Err(format!("{value} is not a finite number of semitones"))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lyra=info")),
        )
        .init();

    let cli = Cli::parse();
    let user = match &cli.config {
        Some(path) => load_user_config_from(path),
        None => load_user_config(),
    }
    .context("loading configuration")?;

    match cli.command {
        Command::Run {
            reference,
            vocal,
            out_wav,
            out_recipe,
            stem,
            preset,
            key_shift,
        } => {
            let mut config = PipelineConfig::resolve(&user, preset.as_deref())?;
            config.reference_is_stem = stem;
            config.key_shift_override = key_shift;
            config.validate()?;
            let paths = OutputPaths {
                wav: out_wav,
                recipe: out_recipe,
            };
            run(config, &reference, &vocal, &paths)
        }
        Command::Render {
            recipe,
            vocal,
            out_wav,
        } => render(&user, &recipe, &vocal, out_wav),
        Command::Presets => {
            list_presets(&user)?;
            Ok(())
        }
    }
}

fn run(config: PipelineConfig, reference: &Path, vocal: &Path, paths: &OutputPaths) -> Result<()> {
    info!(preset = %config.preset_name, stem = config.reference_is_stem, "starting run");
    if !config.reference_is_stem {
        warn!("no vocal separator is configured; the reference is analysed as given");
    }
    let pipeline = Pipeline::builder(config)
        .build()
        .context("initialising the pipeline")?;

    // Removes both outputs unless every step below succeeds
    let guard = OutputGuard::for_outputs(paths);
    let result = pipeline
        .analyze_files(reference, vocal, &mut |_| {})
        .context("analysing takes")?;
    result
        .recipe
        .save(&paths.recipe)
        .with_context(|| format!("saving recipe to {}", paths.recipe.display()))?;
    write_wav(&paths.wav, &result.output)
        .with_context(|| format!("writing {}", paths.wav.display()))?;
    guard.commit();

    let low = result.recipe.low_confidence_segments().count();
    println!(
        "key shift {:+.0} st, {} segments ({} low confidence), mean confidence {:.2}",
        result.key_shift,
        result.recipe.segments.len(),
        low,
        result.alignment.mean_confidence()
    );
    println!("wrote {} and {}", paths.wav.display(), paths.recipe.display());
    Ok(())
}

fn render(user: &UserConfig, recipe_path: &Path, vocal: &Path, out_wav: PathBuf) -> Result<()> {
    let config = PipelineConfig::resolve(user, None)?;
    let pipeline = Pipeline::builder(config)
        .build()
        .context("initialising the pipeline")?;

    let guard = OutputGuard::new(vec![out_wav.clone()]);
    let (recipe, audio) = pipeline
        .render_files(recipe_path, vocal)
        .with_context(|| format!("rendering {} with {}", vocal.display(), recipe_path.display()))?;
    write_wav(&out_wav, &audio).with_context(|| format!("writing {}", out_wav.display()))?;
    guard.commit();

    println!("rendered {} segments to {}", recipe.segments.len(), out_wav.display());
    Ok(())
}

fn list_presets(user: &UserConfig) -> Result<()> {
    let catalog = PresetCatalog::from_user(user)?;
    for (name, preset) in catalog.iter() {
        let marker = if name == catalog.default_name() { "*" } else { " " };
        println!(
            "{marker} {name:<10} low {:.2}  high {:.2}  band {:.2}  {}",
            preset.confidence_low, preset.confidence_high, preset.band_radius, preset.description
        );
    }
    Ok(())
}
