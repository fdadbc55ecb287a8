//! Data models for the migration pipeline.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`LegacyBundle`] / [`LegacyConfig`]: a detected legacy source folder and
//!   its parsed terse config
//! - [`ConversionResult`] / [`BatchOutcome`]: per-bundle and per-batch results
//! - [`EpConfig`] and its blocks: the generated `epconfig.json` model
//! - [`OperatorRecord`]: one subject record from the reference dataset
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Serializable**: the generated config derives `Serialize`/`Deserialize`
//!   so the JSON shape lives in one place
//! - **Immutable in practice**: bundles are read-only after discovery and
//!   results are never mutated after they join a batch outcome

pub mod bundle;
pub mod epconfig;
pub mod operator;

pub use bundle::{BatchOutcome, ConversionResult, LegacyBundle, LegacyConfig};
pub use epconfig::{
    ArknightsOverlayOptions, EpConfig, ImageOverlayOptions, IntroConfig, LoopConfig, Overlay,
    Transition, TransitionKind, TransitionOptions,
};
pub use operator::{OperatorRecord, class_label};
