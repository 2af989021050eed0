//! lyra-services: Audio I/O, analysis collaborators, stretch engine and pipeline

pub mod analysis;
pub mod audio_io;
pub mod config;
pub mod pipeline;
pub mod stretch;
pub mod worker;

pub use analysis::{
    AnalysisError, AnalyzerCache, OnsetConfig, OnsetDetector, PitchBackend, PitchEstimator,
    SpectralFluxOnsetDetector, StemPassthrough, VocalSeparator, VoicedConfig, VoicedDetector, YinConfig,
    YinPitchEstimator, ZcrRmsVoicedDetector,
};
pub use audio_io::{load_audio, read_wav_mono, resample, write_wav, AudioBuffer, AudioIoError};
pub use config::{
    config_path, load_user_config, load_user_config_from, ConfigError, PipelineConfig, Preset, PresetCatalog,
    UserConfig,
};
pub use pipeline::{
    write_outputs, OutputGuard, OutputPaths, Pipeline, PipelineBuilder, PipelineError, PipelineResult, Stage,
    StageProgress,
};
pub use stretch::{build_renderer, EngineError, PhaseVocoder, PhaseVocoderEngine};
pub use worker::{PipelineWorker, WorkerEvent, WorkerRequest};
