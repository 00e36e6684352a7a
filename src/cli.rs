use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

use comic_squash::config::{MAX_BROTLI_EFFORT, MAX_EFFORT, MAX_PREV_CHANNELS};
use comic_squash::error::Result;
use comic_squash::{ConversionConfig, MemberFailurePolicy};

#[derive(Parser, Debug)]
#[command(version, verbatim_doc_comment)]
/// Recompress the images inside comic archives into JPEG XL
///
/// Every .cbz and .cbr file below the input directory is unpacked, its JPEG, PNG
/// and GIF pages are converted with cjxl and the result is written as .cbz into
/// the same relative location below the output directory. Other members are
/// copied unchanged. With the default distance of 0 the conversion is lossless.
pub struct Args {
    #[arg(required = true, help = "Directory receiving the converted archives")]
    pub output: PathBuf,

    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory searched recursively for .cbz and .cbr files"
    )]
    pub input: PathBuf,

    /// Encoder effort, 1 (fast) to 10 (slow)
    #[arg(short, long, default_value_t = 9, value_parser = clap::value_parser!(u8).range(1..=MAX_EFFORT as i64))]
    pub effort: u8,

    /// Brotli effort, 0 to 11
    #[arg(long, default_value_t = 11, value_parser = clap::value_parser!(u8).range(0..=MAX_BROTLI_EFFORT as i64))]
    pub brotli_effort: u8,

    /// Max. butteraugli distance, lower is better quality. 0 is lossless
    #[arg(short, long, default_value_t = 0.0, conflicts_with = "quality")]
    pub distance: f32,

    /// Quality from 0 to 100, used instead of a distance
    #[arg(short, long)]
    pub quality: Option<f32>,

    /// [modular encoding] number of extra MA tree properties
    #[arg(short = 'E', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=MAX_PREV_CHANNELS as i64))]
    pub modular_nb_prev_channels: u8,

    /// Losslessly transcode JPEG pages instead of re-encoding their pixels
    #[arg(short = 'j', long, default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub lossless_jpeg: bool,

    /// Force modular (true) or VarDCT (false) mode
    #[arg(short, long, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub modular: Option<bool>,

    /// Number of images converted at the same time
    ///
    /// Uses as many as you have cores by default.
    #[arg(short, long, verbatim_doc_comment)]
    pub threads: Option<usize>,

    /// Threads used by one cjxl process
    #[arg(long)]
    pub num_threads: Option<usize>,

    /// Number of archives held in memory at the same time. Defaults to --threads
    #[arg(long)]
    pub archives: Option<usize>,

    #[arg(short, long, help = "Replace existing output archives")]
    pub overwrite: bool,

    #[arg(long, help = "Drop Thumbs.db, .DS_Store and *.sfv members")]
    pub strip_junk: bool,

    #[arg(long, help = "Ignore archives and directories starting with a dot")]
    pub skip_hidden: bool,

    /// What to do with an image that fails to convert: keep, exclude or fail
    #[arg(long, default_value = "keep")]
    pub on_failure: MemberFailurePolicy,

    /// Path of the cjxl executable
    #[arg(long)]
    pub cjxl: Option<PathBuf>,

    /// Path of the unrar executable
    #[arg(long)]
    pub unrar: Option<PathBuf>,

    /// Directory for temporary files
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// More output, repeat for even more
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    #[arg(long, help = "Only print warnings and errors")]
    pub quiet: bool,
}

impl Args {
    pub fn log_level(&self) -> log::LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => log::LevelFilter::Warn,
            (false, 0) => log::LevelFilter::Info,
            (false, 1) => log::LevelFilter::Debug,
            (false, _) => log::LevelFilter::Trace,
        }
    }

    pub fn into_config(self) -> Result<ConversionConfig> {
        let mut builder = ConversionConfig::builder();
        builder
            .input_root(self.input)
            .output_root(self.output)
            .effort(self.effort)
            .brotli_effort(self.brotli_effort)
            .distance(self.distance)
            .modular_nb_prev_channels(self.modular_nb_prev_channels)
            .lossless_jpeg(self.lossless_jpeg)
            .overwrite(self.overwrite)
            .strip_junk(self.strip_junk)
            .skip_hidden(self.skip_hidden)
            .failure_policy(self.on_failure);

        if let Some(quality) = self.quality {
            builder.quality(quality);
        }
        if let Some(modular) = self.modular {
            builder.modular(modular);
        }
        if let Some(threads) = self.threads {
            builder.threads(threads);
        }
        if let Some(num_threads) = self.num_threads {
            builder.codec_threads(num_threads);
        }
        if let Some(archives) = self.archives {
            builder.archive_concurrency(archives);
        }
        if let Some(cjxl) = self.cjxl {
            builder.cjxl_path(cjxl);
        }
        if let Some(unrar) = self.unrar {
            builder.unrar_path(unrar);
        }
        if let Some(temp_dir) = self.temp_dir {
            builder.temp_dir(temp_dir);
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["comic-squash", "out"]).unwrap();
        assert_eq!(args.input, PathBuf::from("."));
        assert_eq!(args.log_level(), log::LevelFilter::Info);

        let config = args.into_config().unwrap();
        assert_eq!(config.output_root, PathBuf::from("out"));
        assert_eq!(config.effort, 9);
        assert_eq!(config.brotli_effort, 11);
        assert_eq!(config.distance, 0.0);
        assert_eq!(config.modular_nb_prev_channels, 3);
        assert!(config.lossless_jpeg);
        assert_eq!(config.failure_policy, MemberFailurePolicy::KeepOriginal);
        assert!(!config.skip_hidden);
    }

    #[test]
    fn test_flags_reach_the_config() {
        let args = Args::try_parse_from([
            "comic-squash",
            "-i",
            "comics",
            "-e",
            "7",
            "-E",
            "0",
            "-j",
            "0",
            "-t",
            "3",
            "--on-failure",
            "exclude",
            "--overwrite",
            "--skip-hidden",
            "out",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.input_root, PathBuf::from("comics"));
        assert_eq!(config.effort, 7);
        assert_eq!(config.modular_nb_prev_channels, 0);
        assert!(!config.lossless_jpeg);
        assert_eq!(config.threads, 3);
        assert!(config.overwrite);
        assert!(config.skip_hidden);
        assert_eq!(config.failure_policy, MemberFailurePolicy::Exclude);
    }

    #[test]
    fn test_distance_conflicts_with_quality() {
        assert!(Args::try_parse_from(["comic-squash", "-d", "1", "-q", "90", "out"]).is_err());
        assert!(Args::try_parse_from(["comic-squash", "-q", "90", "out"]).is_ok());
    }

    #[test]
    fn test_out_of_range_effort_is_rejected() {
        assert!(Args::try_parse_from(["comic-squash", "-e", "11", "out"]).is_err());
        assert!(Args::try_parse_from(["comic-squash", "out", "--on-failure", "maybe"]).is_err());
    }
}
