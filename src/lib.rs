//! comic-squash - Lossless JPEG XL Recompression for Comic Archives
//!
//! This crate walks a directory tree of comic book archives (CBZ and CBR),
//! recompresses every JPEG, PNG and GIF page with the JPEG XL encoder and
//! writes the result as a CBZ into a mirrored output tree. Non-image members
//! (metadata, text files) are copied byte for byte, and member order is kept.
//!
//! # Getting Started
//!
//! Configure a run through the `ConversionConfig` builder, then execute it.
//! `cjxl` must be installed; `unrar` is only needed for RAR-based archives.
//!
//! ```rust,no_run
//! use comic_squash::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> comic_squash::error::Result<()> {
//!     let config = ConversionConfig::builder()
//!         .input_root(PathBuf::from("./comics"))
//!         .output_root(PathBuf::from("./comics-jxl"))
//!         .effort(9u8)
//!         .distance(0.0f32)
//!         .failure_policy(MemberFailurePolicy::KeepOriginal)
//!         .build()?;
//!
//!     let report = config.run().await?;
//!     for job in report.jobs.iter().filter(|j| j.is_failure()) {
//!         eprintln!("{}: {:?}", job.input_path.display(), job.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The pipeline pieces (codec, archive reader and writer, classifier) are
//! traits, so a [`Scheduler`](scheduler::Scheduler) can be assembled with
//! other implementations, e.g. in-process fakes for testing.

pub mod archive;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod path_utils;
pub mod pool;
pub mod scheduler;
pub mod types;
pub mod walker;

// Publicly expose the main `ConversionConfig` struct and its builder
pub use config::ConversionConfig;
pub use config::ConversionConfigBuilder;

// Re-export error and core types for direct access
pub use types::{
    ArchiveJob, ContainerKind, ImageKind, JobOutcome, JobReport, JobState, MemberEntry,
    MemberFailure, MemberFailurePolicy, MemberKind, MemberOutcome, PackedMember, RunReport,
};

/// Prelude module for convenient imports.
///
/// Re-exports the configuration, the pipeline traits and the report types,
/// so `use comic_squash::prelude::*;` is enough for most callers.
pub mod prelude {
    pub use super::{
        ArchiveJob, ContainerKind, ConversionConfig, ConversionConfigBuilder, ImageKind,
        JobOutcome, JobReport, JobState, MemberEntry, MemberFailure, MemberFailurePolicy,
        MemberKind, MemberOutcome, PackedMember, RunReport, error, types,
    };
    pub use crate::archive::{ArchiveReader, ArchiveWriter, CbzWriter, SystemArchiveReader};
    pub use crate::classifier::{ContentClassifier, MagicClassifier};
    pub use crate::codec::{CjxlCodec, Codec};
    pub use crate::pool::WorkerPool;
    pub use crate::scheduler::Scheduler;
    pub use crate::walker::TreeWalker;
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
