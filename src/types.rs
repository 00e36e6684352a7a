//! Core data types, enums, and reports for comic-squash.
//!
//! This module defines the data flowing through a run:
//! - Discovered archives (`ArchiveJob`) and their lifecycle (`JobState`)
//! - Archive members (`MemberEntry`) with their classification and outcome
//! - Policies (`MemberFailurePolicy`)
//! - Reports (`JobReport`, `RunReport`)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Container family of an input comic archive.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContainerKind {
    Zip, // cbz, or a cbr that is secretly a zip
    Rar,
}

/// Raster formats eligible for recompression.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            image::ImageFormat::Png => Some(ImageKind::Png),
            image::ImageFormat::Gif => Some(ImageKind::Gif),
            _ => None,
        }
    }

    /// Conventional file extension, used for scratch files handed to the codec.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
        }
    }
}

/// Classification of one archive member.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum MemberKind {
    Image(ImageKind),
    #[default]
    PassThrough,
}

impl MemberKind {
    pub fn is_image(&self) -> bool {
        matches!(self, MemberKind::Image(_))
    }
}

/// What happened to a member during the converting stage.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub enum MemberOutcome {
    #[default]
    Pending,
    /// Replacement bytes produced by the codec
    Converted(Vec<u8>),
    /// Keep `MemberEntry::data` unchanged
    Original,
    /// Conversion failed; the failure policy decides what gets written
    Failed(String),
}

/// One file inside an archive.
#[derive(Debug, Clone, Default)]
pub struct MemberEntry {
    /// Path inside the archive, `/` separated, preserved verbatim
    pub name: String,
    pub data: Vec<u8>,
    pub kind: MemberKind,
    pub outcome: MemberOutcome,
}

impl MemberEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            kind: MemberKind::PassThrough,
            outcome: MemberOutcome::Pending,
        }
    }
}

/// A member ready to be packed into the output archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedMember {
    pub name: String,
    pub data: Vec<u8>,
}

/// What to do with a member whose conversion failed.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemberFailurePolicy {
    /// Write the original bytes under the original name
    #[default]
    KeepOriginal,
    /// Leave the member out of the output archive
    Exclude,
    /// Fail the whole archive; no output is written
    FailArchive,
}

impl FromStr for MemberFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" | "keep-original" | "original" => Ok(MemberFailurePolicy::KeepOriginal),
            "exclude" | "drop" => Ok(MemberFailurePolicy::Exclude),
            "fail" | "fail-archive" | "abort" => Ok(MemberFailurePolicy::FailArchive),
            other => Err(format!(
                "unknown failure policy '{other}' (expected keep, exclude or fail)"
            )),
        }
    }
}

/// Lifecycle of an [`ArchiveJob`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JobState {
    #[default]
    Discovered,
    Extracting,
    Converting,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Discovered => "discovered",
            JobState::Extracting => "extracting",
            JobState::Converting => "converting",
            JobState::Writing => "writing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One discovered input archive.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub input_path: PathBuf,
    /// Path of the input relative to the input root
    pub relative_path: PathBuf,
    pub output_path: PathBuf,
    pub kind: ContainerKind,
    pub state: JobState,
    /// Another discovered archive already maps to `output_path`
    pub collision: bool,
}

impl ArchiveJob {
    pub fn new(
        input_path: PathBuf,
        relative_path: PathBuf,
        output_path: PathBuf,
        kind: ContainerKind,
    ) -> Self {
        Self {
            input_path,
            relative_path,
            output_path,
            kind,
            state: JobState::Discovered,
            collision: false,
        }
    }

    pub fn transition(&mut self, next: JobState) {
        log::debug!(
            "{}: {} -> {}",
            self.relative_path.display(),
            self.state,
            next
        );
        self.state = next;
    }
}

/// Final state of a job as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JobOutcome {
    Done,
    /// Nothing was attempted, e.g. the output already exists
    Skipped(String),
    Failed(String),
    /// The run was interrupted before the job finished
    Cancelled,
}

/// A member that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemberFailure {
    pub name: String,
    pub reason: String,
}

/// Result of processing one archive.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JobReport {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub outcome: JobOutcome,
    pub converted: usize,
    pub passed_through: usize,
    pub excluded: usize,
    pub member_failures: Vec<MemberFailure>,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl JobReport {
    pub fn new(job: &ArchiveJob, outcome: JobOutcome) -> Self {
        Self {
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            outcome,
            converted: 0,
            passed_through: 0,
            excluded: 0,
            member_failures: Vec::new(),
            original_size: 0,
            compressed_size: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_) | JobOutcome::Cancelled)
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Done))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_) | JobOutcome::Cancelled))
    }

    /// True when no job failed or was cancelled.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn original_size(&self) -> u64 {
        self.finished().map(|j| j.original_size).sum()
    }

    pub fn compressed_size(&self) -> u64 {
        self.finished().map(|j| j.compressed_size).sum()
    }

    fn finished(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Done))
    }

    fn count(&self, predicate: impl Fn(&JobOutcome) -> bool) -> usize {
        self.jobs.iter().filter(|j| predicate(&j.outcome)).count()
    }
}

const MIB: f64 = 1024.0 * 1024.0;

/// Formats a size comparison, e.g. `A.cbz - 10/15 (-5) [MiB] 67%`.
pub fn statistics_string(compressed_size: u64, original_size: u64, prefix: &str) -> String {
    let difference = compressed_size as f64 - original_size as f64;
    let quotient = if original_size == 0 {
        100.0
    } else {
        (compressed_size as f64 / original_size as f64 * 100.0).round()
    };

    format!(
        "{} - {}/{} ({}) [MiB] {}%",
        prefix,
        (compressed_size as f64 / MIB).round() as i64,
        (original_size as f64 / MIB).round() as i64,
        (difference / MIB).round() as i64,
        quotient as i64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_string() {
        let s = statistics_string(10 * 1024 * 1024, 15 * 1024 * 1024, "A.cbz");
        assert_eq!(s, "A.cbz - 10/15 (-5) [MiB] 67%");
    }

    #[test]
    fn test_statistics_string_empty_original() {
        let s = statistics_string(0, 0, "empty");
        assert_eq!(s, "empty - 0/0 (0) [MiB] 100%");
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!(
            "keep".parse::<MemberFailurePolicy>(),
            Ok(MemberFailurePolicy::KeepOriginal)
        );
        assert_eq!(
            "Exclude".parse::<MemberFailurePolicy>(),
            Ok(MemberFailurePolicy::Exclude)
        );
        assert_eq!(
            "fail".parse::<MemberFailurePolicy>(),
            Ok(MemberFailurePolicy::FailArchive)
        );
        assert!("sometimes".parse::<MemberFailurePolicy>().is_err());
    }
}
