//! Archive module provides the reading and writing interfaces for comic archives.
//!
//! Reading hides whether the container is zip- or rar-based; writing always
//! produces a zip (`.cbz`). The scheduler only depends on the traits below.

use crate::error::Result;
use crate::types::{ContainerKind, MemberEntry, PackedMember};
use async_trait::async_trait;
use std::path::Path;

pub mod reader;
pub mod writer;

pub use reader::SystemArchiveReader;
pub use writer::CbzWriter;

/// Extracts the members of an input archive.
#[async_trait]
pub trait ArchiveReader: Send + Sync {
    /// Returns every file member of `path`, in archive order.
    ///
    /// # Parameters
    /// * `path` - The archive to open
    /// * `kind` - The sniffed container family, selecting the extraction mechanism
    /// * `workspace` - Job-scoped scratch directory; the caller owns its cleanup
    ///
    /// # Returns
    /// * `Ok(Vec<MemberEntry>)` - Members with their raw bytes, directories omitted
    /// * `Err(Error::Extraction)` - The archive is corrupt, encrypted or unsupported
    async fn open(
        &self,
        path: &Path,
        kind: ContainerKind,
        workspace: &Path,
    ) -> Result<Vec<MemberEntry>>;
}

/// Packs members into an output archive.
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    /// Writes `members`, in the given order, to `output_path`.
    ///
    /// The file only appears at `output_path` once it is complete; on any
    /// failure nothing is left behind. Missing parent directories are created.
    ///
    /// # Returns
    /// * `Ok(u64)` - Size of the written archive in bytes
    /// * `Err(Error::Write)` - The archive could not be written
    async fn write(
        &self,
        output_path: &Path,
        members: Vec<PackedMember>,
        overwrite: bool,
    ) -> Result<u64>;
}
