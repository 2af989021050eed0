//! Staged analysis and correction pipeline
//!
//! A run moves through seven stages: load, reference preparation, pitch,
//! onsets and voicing, key shift, alignment, then recipe generation and
//! render. Progress is reported at each stage boundary through a callback so
//! the CLI and the background worker can both drive it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lyra_core::{
    align, detect_key_shift, generate, AlignmentResult, LyraError, PitchCurve, Recipe, RecipeInputs,
    Renderer, StretchEngine,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::{
    AnalysisError, OnsetConfig, OnsetDetector, PitchEstimator, SpectralFluxOnsetDetector, StemPassthrough,
    VocalSeparator, VoicedConfig, VoicedDetector, YinConfig, YinPitchEstimator, ZcrRmsVoicedDetector,
};
use crate::audio_io::{load_audio, resample, write_wav, AudioBuffer, AudioIoError};
use crate::config::{ConfigError, PipelineConfig};
use crate::stretch::{build_renderer, EngineError, PhaseVocoderEngine};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioIoError),
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Recipe(#[from] LyraError),
    #[error("{0} audio is empty")]
    EmptyAudio(&'static str),
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoadAudio,
    PrepareReference,
    EstimatePitch,
    DetectEvents,
    KeyShift,
    Align,
    GenerateAndRender,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::LoadAudio,
        Stage::PrepareReference,
        Stage::EstimatePitch,
        Stage::DetectEvents,
        Stage::KeyShift,
        Stage::Align,
        Stage::GenerateAndRender,
    ];

    /// One-based position of the stage
    pub fn number(self) -> usize {
        match self {
            Stage::LoadAudio => 1,
            Stage::PrepareReference => 2,
            Stage::EstimatePitch => 3,
            Stage::DetectEvents => 4,
            Stage::KeyShift => 5,
            Stage::Align => 6,
            Stage::GenerateAndRender => 7,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::LoadAudio => "loading audio",
            Stage::PrepareReference => "preparing reference vocal",
            Stage::EstimatePitch => "estimating pitch",
            Stage::DetectEvents => "detecting onsets and voicing",
            Stage::KeyShift => "estimating key shift",
            Stage::Align => "aligning performances",
            Stage::GenerateAndRender => "generating recipe and rendering",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageProgress {
    pub stage: Stage,
    pub message: String,
}

impl StageProgress {
    fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn step(&self) -> usize {
        self.stage.number()
    }

    pub fn total(&self) -> usize {
        Stage::ALL.len()
    }
}

/// Everything a front end needs to inspect a run or re-render it
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub reference_pitch: PitchCurve,
    pub new_pitch: PitchCurve,
    /// The new performance at the pipeline sample rate
    pub new_audio: AudioBuffer,
    pub alignment: AlignmentResult,
    pub key_shift: f64,
    pub recipe: Recipe,
    pub output: AudioBuffer,
}

/// Where a run writes its corrected audio and recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub wav: PathBuf,
    pub recipe: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            wav: PathBuf::from("edited_vocal.wav"),
            recipe: PathBuf::from("recipe.json"),
        }
    }
}

/// Removes its files on drop unless committed
///
/// Create it before the first file is written so a failure at any later
/// point leaves no partial output behind.
pub struct OutputGuard {
    files: Vec<PathBuf>,
    committed: bool,
}

impl OutputGuard {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            committed: false,
        }
    }

    /// Guard both the corrected audio and the recipe
    pub fn for_outputs(paths: &OutputPaths) -> Self {
        Self::new(vec![paths.wav.clone(), paths.recipe.clone()])
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.files {
            match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "removed partial output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
            }
        }
    }
}

/// Write the recipe, then the audio, removing both if either write fails
pub fn write_outputs(paths: &OutputPaths, recipe: &Recipe, audio: &AudioBuffer) -> Result<(), PipelineError> {
    let guard = OutputGuard::for_outputs(paths);
    recipe.save(&paths.recipe)?;
    write_wav(&paths.wav, audio)?;
    guard.commit();
    info!(wav = %paths.wav.display(), recipe = %paths.recipe.display(), "outputs written");
    Ok(())
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    pitch: Option<Arc<dyn PitchEstimator>>,
    onsets: Option<Arc<dyn OnsetDetector>>,
    voiced: Option<Arc<dyn VoicedDetector>>,
    separator: Option<Arc<dyn VocalSeparator>>,
    engine: Option<Arc<dyn StretchEngine>>,
    renderer: Option<Renderer>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            pitch: None,
            onsets: None,
            voiced: None,
            separator: None,
            engine: None,
            renderer: None,
        }
    }

    pub fn pitch_estimator(mut self, estimator: Arc<dyn PitchEstimator>) -> Self {
        self.pitch = Some(estimator);
        self
    }

    pub fn onset_detector(mut self, detector: Arc<dyn OnsetDetector>) -> Self {
        self.onsets = Some(detector);
        self
    }

    pub fn voiced_detector(mut self, detector: Arc<dyn VoicedDetector>) -> Self {
        self.voiced = Some(detector);
        self
    }

    pub fn separator(mut self, separator: Arc<dyn VocalSeparator>) -> Self {
        self.separator = Some(separator);
        self
    }

    /// Engine to probe and render with; ignored when a renderer is supplied
    pub fn engine(mut self, engine: Arc<dyn StretchEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Reuse an already probed renderer
    pub fn renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Fill in the built-in collaborators and probe the stretch engine
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let hop = self.config.hop_length;
        let renderer = match self.renderer {
            Some(renderer) => renderer,
            None => {
                let engine = match self.engine {
                    Some(engine) => engine,
                    None => Arc::new(PhaseVocoderEngine::default()),
                };
                build_renderer(engine)?
            }
        };
        let pitch = self.pitch.unwrap_or_else(|| {
            Arc::new(YinPitchEstimator::new(YinConfig {
                hop_length: hop,
                ..YinConfig::default()
            }))
        });
        let onsets = self.onsets.unwrap_or_else(|| {
            Arc::new(SpectralFluxOnsetDetector::new(OnsetConfig {
                hop_length: hop,
                ..OnsetConfig::default()
            }))
        });
        let voiced = self.voiced.unwrap_or_else(|| {
            Arc::new(ZcrRmsVoicedDetector::new(VoicedConfig {
                hop_length: hop,
                ..VoicedConfig::default()
            }))
        });
        let separator = self.separator.unwrap_or_else(|| Arc::new(StemPassthrough));

        Ok(Pipeline {
            config: self.config,
            pitch,
            onsets,
            voiced,
            separator,
            renderer,
        })
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    pitch: Arc<dyn PitchEstimator>,
    onsets: Arc<dyn OnsetDetector>,
    voiced: Arc<dyn VoicedDetector>,
    separator: Arc<dyn VocalSeparator>,
    renderer: Renderer,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Run every stage on two audio files
    pub fn analyze_files(
        &self,
        reference: &Path,
        vocal: &Path,
        progress: &mut dyn FnMut(StageProgress),
    ) -> Result<PipelineResult, PipelineError> {
        let rate = self.config.target_sample_rate;
        report(progress, Stage::LoadAudio, format!("{} + {}", reference.display(), vocal.display()));
        let reference = load_audio(reference, rate)?;
        let vocal = load_audio(vocal, rate)?;
        self.run(reference, vocal, progress)
    }

    /// Run every stage on decoded audio, resampling to the pipeline rate if needed
    pub fn analyze(
        &self,
        reference: AudioBuffer,
        vocal: AudioBuffer,
        progress: &mut dyn FnMut(StageProgress),
    ) -> Result<PipelineResult, PipelineError> {
        report(progress, Stage::LoadAudio, "conforming sample rates");
        let reference = self.conform(reference)?;
        let vocal = self.conform(vocal)?;
        self.run(reference, vocal, progress)
    }

    fn conform(&self, buffer: AudioBuffer) -> Result<AudioBuffer, PipelineError> {
        let rate = self.config.target_sample_rate;
        if buffer.sample_rate == rate {
            return Ok(buffer);
        }
        let samples = resample(&buffer.samples, buffer.sample_rate, rate)?;
        Ok(AudioBuffer::new(samples, rate))
    }

    fn run(
        &self,
        reference: AudioBuffer,
        vocal: AudioBuffer,
        progress: &mut dyn FnMut(StageProgress),
    ) -> Result<PipelineResult, PipelineError> {
        if reference.is_empty() {
            return Err(PipelineError::EmptyAudio("reference"));
        }
        if vocal.is_empty() {
            return Err(PipelineError::EmptyAudio("new vocal"));
        }
        self.config.validate()?;
        let sr = vocal.sample_rate;
        let preset = &self.config.preset;

        let reference = if self.config.reference_is_stem {
            report(progress, Stage::PrepareReference, "reference is a vocal stem, separation skipped");
            reference
        } else {
            report(progress, Stage::PrepareReference, format!("isolating vocal with {}", self.separator.name()));
            self.separator.isolate(reference)?
        };

        report(progress, Stage::EstimatePitch, self.pitch.name().to_string());
        let reference_pitch = self.pitch.estimate(&reference.samples, reference.sample_rate)?;
        let new_pitch = self.pitch.estimate(&vocal.samples, sr)?;

        report(progress, Stage::DetectEvents, "onsets for both, voicing for the new take");
        let reference_onsets = self.onsets.detect(&reference.samples, reference.sample_rate)?;
        let new_onsets = self.onsets.detect(&vocal.samples, sr)?;
        let voiced = self.voiced.detect(&vocal.samples, sr)?;
        debug!(
            reference_onsets = reference_onsets.len(),
            new_onsets = new_onsets.len(),
            "events detected"
        );

        let key_shift = match self.config.key_shift_override {
            Some(shift) => {
                report(progress, Stage::KeyShift, format!("manual {shift:+.1} semitones"));
                shift
            }
            None => {
                let shift = detect_key_shift(&reference_pitch, &new_pitch);
                report(progress, Stage::KeyShift, format!("detected {shift:+.0} semitones"));
                shift
            }
        };

        report(progress, Stage::Align, format!("band radius {}", preset.band_radius));
        let alignment = align(
            &reference_pitch,
            &reference_onsets,
            &new_pitch,
            &new_onsets,
            &preset.alignment(),
        );

        report(progress, Stage::GenerateAndRender, format!("preset {}", self.config.preset_name));
        let inputs = RecipeInputs {
            new_duration: vocal.duration_secs(),
            sample_rate: sr,
            global_key_shift: key_shift,
            alignment: &alignment,
            reference: &reference_pitch,
            new: &new_pitch,
            voiced_mask: &voiced,
        };
        let recipe = generate(&inputs, &preset.thresholds());
        let output = self.renderer.render(&vocal.samples, sr, &recipe, Some(&new_pitch))?;

        info!(
            segments = recipe.segments.len(),
            warnings = recipe.warnings.len(),
            key_shift,
            mean_confidence = alignment.mean_confidence(),
            "analysis complete"
        );
        Ok(PipelineResult {
            reference_pitch,
            new_pitch,
            new_audio: vocal,
            alignment,
            key_shift,
            recipe,
            output: AudioBuffer::new(output, sr),
        })
    }

    /// Render `audio` through an edited or loaded recipe
    pub fn rerender(
        &self,
        audio: &AudioBuffer,
        new_pitch: Option<&PitchCurve>,
        recipe: &Recipe,
    ) -> Result<AudioBuffer, PipelineError> {
        recipe.validate()?;
        let samples = self.renderer.render(&audio.samples, audio.sample_rate, recipe, new_pitch)?;
        Ok(AudioBuffer::new(samples, audio.sample_rate))
    }

    /// Re-render a previous run's audio with a new recipe
    pub fn rerender_result(&self, result: &PipelineResult, recipe: &Recipe) -> Result<AudioBuffer, PipelineError> {
        self.rerender(&result.new_audio, Some(&result.new_pitch), recipe)
    }

    /// Load a saved recipe and apply it to a vocal file
    ///
    /// The vocal's pitch curve is re-estimated since recipes do not store it.
    pub fn render_files(&self, recipe: &Path, vocal: &Path) -> Result<(Recipe, AudioBuffer), PipelineError> {
        let recipe = Recipe::load(recipe)?;
        let vocal = load_audio(vocal, self.config.target_sample_rate)?;
        let pitch = self.pitch.estimate(&vocal.samples, vocal.sample_rate)?;
        let output = self.rerender(&vocal, Some(&pitch), &recipe)?;
        Ok((recipe, output))
    }
}

fn report(progress: &mut dyn FnMut(StageProgress), stage: Stage, message: impl Into<String>) {
    let update = StageProgress::new(stage, message);
    info!(step = update.step(), total = update.total(), detail = %update.message, "{}", stage.description());
    progress(update);
}
