//! Services module - the conversion pipeline's business logic.
//!
//! Everything here is framework-agnostic: no GUI dependencies, explicit
//! inputs, results instead of panics. The components layer bottom-up:
//!
//! - [`scanner::BundleScanner`]: detects legacy bundles and parses their
//!   terse config files
//! - [`raw_image`]: decodes headerless BGRA buffers, recovers geometry,
//!   applies orientation fixes and writes PNGs
//! - [`classifier::TemplateClassifier`]: matches overlays against the
//!   standard template (normalized correlation, fixed threshold)
//! - [`textextract::TextExtractor`]: crops the name plate and drives the
//!   external recognition engine
//! - [`identity::IdentityIndex`]: the reference dataset with exact and
//!   fuzzy lookup
//! - [`resolver::IdentityResolver`]: composes the three above into one
//!   decision procedure with a disambiguation hook
//! - [`transcoder::FfmpegTools`]: external encoder/prober subprocesses
//! - [`convert::ConversionOrchestrator`]: sequences one bundle's steps and
//!   emits the generated config
//! - [`batch::BatchCoordinator`]: drives whole batches with progress
//!   callbacks and the cross-thread confirmation bridge
//! - [`media::MediaFrameProcessor`]: bounded-concurrency frame utility,
//!   independent of the pipeline
//!
//! # Design Philosophy
//!
//! - **Degrade, don't abort**: missing templates, datasets or recognition
//!   engines disable their feature and the batch keeps going
//! - **Async**: subprocess work runs under tokio; CPU-bound image work
//!   stays inline
//! - **Testable**: external tool paths are injectable, command
//!   construction is pure

pub mod batch;
pub mod classifier;
pub mod convert;
pub mod identity;
pub mod media;
pub mod raw_image;
pub mod resolver;
pub mod scanner;
pub mod textextract;
pub mod transcoder;

pub use batch::{BatchCoordinator, ConfirmationBridge, ConfirmationRequest};
pub use classifier::{ClassificationResult, TemplateClassifier};
pub use convert::{ConversionOrchestrator, OverlayMode};
pub use identity::{IdentityIndex, IdentityMatch};
pub use media::MediaFrameProcessor;
pub use raw_image::{RawDecodeError, RawImageSpec, RawTransform};
pub use resolver::{Disambiguator, IdentityResolver, Recognition};
pub use scanner::{BundleScanner, ScanError};
pub use transcoder::{FfmpegTools, TranscodeError, VideoInfo};
