// Correctness and logic
#![warn(clippy::unit_cmp)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::unreachable)]
// Performance-focused
#![warn(clippy::inefficient_to_string)]
#![warn(clippy::map_clone)]
#![warn(clippy::unnecessary_to_owned)]
#![warn(clippy::needless_collect)]
// Style and idiomatic Rust
#![warn(clippy::redundant_clone)]
#![warn(clippy::needless_return)]
#![warn(clippy::manual_map)]

//! # audio_features
//!
//! The core of an audio-analysis engine: a time-indexed model graph through
//! which audio samples flow into feature-extraction plugins and out as
//! annotated event and matrix models.
//!
//! ## Overview
//!
//! Four subsystems carry the weight:
//!
//! - [`EventSeries`]: a sparse, time-ordered event container with a seam
//!   index for fast "what covers frame f?" queries.
//! - [`cache::DecodeCache`]: a streaming decode pipeline that accepts
//!   pushed PCM blocks, optionally normalises and resamples them, and
//!   stores the result in RAM or in a temporary WAV cache that stays
//!   readable while the decode thread writes.
//! - [`align::AlignmentModel`]: a monotone piecewise-linear mapping
//!   between two audio timelines, built from a sparse path that may still
//!   be growing.
//! - [`transform::FeatureExtractionTransformer`]: a worker that pumps
//!   fixed-size blocks from a dense audio model through a plugin,
//!   classifies the plugin's declared outputs, and streams features into
//!   the matching output models with progress reporting and cooperative
//!   cancellation.
//!
//! Models carry process-unique ids, report completion 0..=100 (monotone,
//! with a single `Ready` notification at 100), and deliver change
//! notifications synchronously on the mutating thread. Inter-model
//! references go through a [`model::registry::ModelRegistry`] by id.
//!
//! File-format decoders, plugin transports, and any UI are deliberately
//! outside this crate: decoders push PCM into a `DecodeCache`, and plugin
//! hosts implement [`plugin::FeaturePlugin`] / [`plugin::PluginFactory`].

pub mod align;
pub mod cache;
pub mod env;
pub mod error;
pub mod event;
pub mod model;
pub mod plugin;
pub mod series;
pub mod time;
pub mod transform;

pub use align::AlignmentModel;
pub use cache::{CacheMode, DecodeCache, DecodeCacheConfig};
pub use env::RuntimeEnv;
pub use error::{EngineError, EngineResult};
pub use event::Event;
pub use model::dense::{AudioSource, GridModel};
pub use model::path::{PathModel, PathPoint};
pub use model::registry::ModelRegistry;
pub use model::sparse::{
    NoteModel, RegionModel, SparseOneDimensionalModel, SparseTimeValueModel,
};
pub use model::{
    DelimitedExportable, Model, ModelBase, ModelEvent, ModelId, ModelObserver, TabularModel,
    TimeExportFormat,
};
pub use plugin::{Feature, FeaturePlugin, InputDomain, OutputDescriptor, PluginFactory, SampleType};
pub use series::{Direction, EventSeries};
pub use time::RealTime;
pub use transform::{
    FeatureExtractionTransformer, MultiValuePolicy, TransformDescriptor, TransformOutput,
    TransformerHandle, WindowShape,
};
