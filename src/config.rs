use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::path_utils::is_inside;
use crate::scheduler::Scheduler;
use crate::types::{MemberFailurePolicy, RunReport};

/// Highest `--effort` accepted by cjxl (10 needs expert options, 11 is rejected).
pub const MAX_EFFORT: u8 = 10;
/// Highest `--brotli_effort` accepted by cjxl.
pub const MAX_BROTLI_EFFORT: u8 = 11;
/// Highest `--modular_nb_prev_channels` accepted by cjxl.
pub const MAX_PREV_CHANNELS: u8 = 11;
/// Largest butteraugli distance accepted by cjxl.
pub const MAX_DISTANCE: f32 = 25.0;

/// Process-wide configuration for a run, built declaratively using the builder pattern.
///
/// The record is immutable once built: the scheduler shares it behind an
/// [`Arc`] and never mutates it. It carries two kinds of settings:
///
/// - codec parameters (`effort`, `brotli_effort`, `distance`/`quality`,
///   `modular_nb_prev_channels`, `lossless_jpeg`, `modular`, `codec_threads`),
///   applied uniformly to every image conversion
/// - scheduling parameters (`threads`, `archive_concurrency`, paths, policies)
///
/// ## Builder Pattern
///
/// ```rust,no_run
/// # use comic_squash::prelude::*;
/// # #[tokio::main]
/// # async fn main() -> comic_squash::error::Result<()> {
/// let config = ConversionConfig::builder()
///     .input_root(PathBuf::from("./comics"))
///     .output_root(PathBuf::from("./compressed"))
///     .effort(7u8)
///     .threads(4usize)
///     .build()?;
///
/// config.preflight_check()?;
/// let report = config.run().await?;
/// println!("{} archives converted, {} failed", report.done(), report.failed());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct ConversionConfig {
    // --- Codec Settings ---
    /// Encoder effort, 1 (fastest) to 10 (slowest).
    #[builder(default = "9")]
    pub effort: u8,

    /// Brotli effort used for the container metadata, 0 to 11.
    #[builder(default = "11")]
    pub brotli_effort: u8,

    /// Maximum butteraugli distance. `0.0` is mathematically lossless.
    #[builder(default = "0.0")]
    pub distance: f32,

    /// Quality setting (0 to 100), mapped to a distance by the encoder.
    ///
    /// Mutually exclusive with a non-zero [`distance`](ConversionConfig::distance).
    #[builder(default)]
    pub quality: Option<f32>,

    /// Number of extra MA tree properties for modular encoding.
    #[builder(default = "3")]
    pub modular_nb_prev_channels: u8,

    /// Losslessly transcode JPEG sources instead of re-encoding pixels.
    ///
    /// Only JPEG members receive this flag; PNG and GIF members are always
    /// encoded from pixels.
    #[builder(default = "true")]
    pub lossless_jpeg: bool,

    /// Force modular mode (`true`) or VarDCT (`false`). The encoder decides when unset.
    #[builder(default)]
    pub modular: Option<bool>,

    /// Threads used by one codec invocation.
    ///
    /// Defaults to the host parallelism divided by [`threads`](ConversionConfig::threads).
    #[builder(default)]
    pub codec_threads: Option<usize>,

    // --- Scheduling Settings ---
    /// Size of the global worker pool: the maximum number of codec invocations
    /// running at the same time, across all archives.
    #[builder(default = "num_cpus::get()")]
    pub threads: usize,

    /// Number of archives held open (extracted into memory) at the same time.
    ///
    /// Defaults to [`threads`](ConversionConfig::threads). This does not raise
    /// the number of concurrent codec invocations.
    #[builder(default)]
    pub archive_concurrency: Option<usize>,

    /// Directory scanned recursively for `.cbz`/`.cbr` files.
    #[builder(default = "PathBuf::from(\".\")")]
    pub input_root: PathBuf,

    /// Directory receiving the mirrored tree of `.cbz` files.
    #[builder(default)]
    pub output_root: PathBuf,

    /// Replace output archives that already exist instead of skipping them.
    #[builder(default = "false")]
    pub overwrite: bool,

    /// Ignore archives and directories whose name starts with a dot.
    ///
    /// Off by default: every `.cbz`/`.cbr` below the input root is a candidate.
    #[builder(default = "false")]
    pub skip_hidden: bool,

    /// Drop `Thumbs.db`, `.DS_Store` and `*.sfv` members.
    #[builder(default = "false")]
    pub strip_junk: bool,

    /// What happens to a member whose conversion fails.
    #[builder(default)]
    pub failure_policy: MemberFailurePolicy,

    /// Explicit location of the `cjxl` binary. Looked up on `PATH` when unset.
    #[builder(default)]
    pub cjxl_path: Option<PathBuf>,

    /// Explicit location of the `unrar` binary. Looked up on `PATH` when unset.
    #[builder(default)]
    pub unrar_path: Option<PathBuf>,

    /// Parent directory for per-archive workspaces. The system temp dir when unset.
    #[builder(default)]
    pub temp_dir: Option<PathBuf>,
}

impl ConversionConfig {
    /// Creates a new builder for configuring `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder::default()
    }

    /// Threads handed to each codec invocation.
    pub fn effective_codec_threads(&self) -> usize {
        self.codec_threads
            .unwrap_or_else(|| num_cpus::get() / self.threads.max(1))
            .max(1)
    }

    /// Number of archives processed at the same time.
    pub fn effective_archive_concurrency(&self) -> usize {
        self.archive_concurrency.unwrap_or(self.threads).max(1)
    }

    /// Performs filesystem checks before a run.
    ///
    /// The builder already validated value ranges; this checks that the input
    /// root can be scanned and that the output root is usable.
    ///
    /// # Returns
    ///
    /// * `Ok(&self)` - Configuration is ready to run
    /// * `Err(Error::Discovery)` - The input root is missing or not a directory
    /// * `Err(Error)` - The output root is missing or clashes with the input root
    pub fn preflight_check(&self) -> Result<&Self> {
        if self.output_root.as_os_str().is_empty() {
            return Err(Error::Other("Output directory is required".to_string()));
        }
        if !self.input_root.exists() {
            return Err(Error::discovery(
                &self.input_root,
                "input directory does not exist",
            ));
        }
        if !self.input_root.is_dir() {
            return Err(Error::discovery(
                &self.input_root,
                "input path is not a directory",
            ));
        }
        if self.output_root.exists() && !self.output_root.is_dir() {
            return Err(Error::InvalidPath(
                self.output_root.clone(),
                "Output path is not a directory.".to_string(),
            ));
        }

        let input = self.input_root.canonicalize()?;
        let output = match self.output_root.canonicalize() {
            Ok(output) => output,
            Err(_) => std::path::absolute(&self.output_root)?,
        };
        if input == output && !self.overwrite {
            return Err(Error::InvalidPath(
                self.output_root.clone(),
                "Output directory equals the input directory; pass overwrite to replace the originals"
                    .to_string(),
            ));
        }
        if is_inside(&input, &output) {
            return Err(Error::InvalidPath(
                self.output_root.clone(),
                "Input directory lies inside the output directory".to_string(),
            ));
        }

        Ok(self)
    }

    /// Runs the full pipeline: discover, extract, convert, repack.
    ///
    /// External programs (`cjxl`, `unrar`) are located before any archive is
    /// touched. Per-archive failures are part of the returned report; only
    /// fatal problems (discovery, missing tools) become an `Err`.
    pub async fn run(self) -> Result<RunReport> {
        self.preflight_check()?;
        let scheduler = Scheduler::with_defaults(Arc::new(self))?;
        scheduler.run().await
    }
}

impl ConversionConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(effort) = self.effort {
            if !(1..=MAX_EFFORT).contains(&effort) {
                return Err(format!("effort must be between 1 and {MAX_EFFORT}"));
            }
        }
        if let Some(brotli_effort) = self.brotli_effort {
            if brotli_effort > MAX_BROTLI_EFFORT {
                return Err(format!(
                    "brotli_effort must be between 0 and {MAX_BROTLI_EFFORT}"
                ));
            }
        }
        if let Some(channels) = self.modular_nb_prev_channels {
            if channels > MAX_PREV_CHANNELS {
                return Err(format!(
                    "modular_nb_prev_channels must be between 0 and {MAX_PREV_CHANNELS}"
                ));
            }
        }
        if let Some(distance) = self.distance {
            if !(0.0..=MAX_DISTANCE).contains(&distance) {
                return Err(format!("distance must be between 0 and {MAX_DISTANCE}"));
            }
        }
        if let Some(Some(quality)) = self.quality {
            if !(0.0..=100.0).contains(&quality) {
                return Err("quality must be between 0 and 100".to_string());
            }
            if self.distance.is_some_and(|d| d != 0.0) {
                return Err("quality and distance are mutually exclusive".to_string());
            }
        }
        if self.threads == Some(0) {
            return Err("threads must be at least 1".to_string());
        }
        if let Some(Some(0)) = self.codec_threads {
            return Err("codec_threads must be at least 1".to_string());
        }
        if let Some(Some(0)) = self.archive_concurrency {
            return Err("archive_concurrency must be at least 1".to_string());
        }

        Ok(())
    }
}
