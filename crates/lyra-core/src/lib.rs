//! lyra-core: Alignment, correction recipes and rendering for vocal takes
//!
//! This crate contains:
//! - Data model shared by every stage (pitch curves, onsets, alignment output)
//! - Feature building and banded DTW alignment
//! - Recipe generation, validation and JSON persistence
//! - Recipe rendering over an abstract stretch engine
//!
//! All computation is pure and single-threaded; audio and model I/O live in
//! `lyra-services`.

pub mod aligner;
mod error;
pub mod features;
mod interp;
pub mod key;
pub mod recipe;
pub mod render;
mod types;

pub use aligner::{align, AlignmentParams};
pub use error::{LyraError, Result};
pub use features::{build_features, hz_to_cents, FeatureFrame};
pub use key::detect_key_shift;
pub use recipe::{
    generate, strength_from_confidence, Recipe, RecipeInputs, Segment, StrengthThresholds, Warning,
    LOW_CONFIDENCE, RECIPE_VERSION, SUPPORTED_VERSIONS,
};
pub use render::{segment_pitch_shift, segment_stretch_ratio, Renderer, StretchEngine};
pub use types::{AlignmentResult, OnsetSet, PitchCurve, PitchPoint, VoicedMask, WarpPoint};
