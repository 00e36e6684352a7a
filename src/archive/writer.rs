use crate::archive::ArchiveWriter;
use crate::error::{Error, Result};
use crate::path_utils::get_file_name_lossy;
use crate::types::PackedMember;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// A writer for CBZ (Comic Book ZIP) files.
///
/// Members are stored uncompressed by default: recompressed images gain
/// nothing from deflate. Every entry gets the same fixed timestamp so that
/// identical inputs always produce byte-identical archives.
#[derive(Debug, Clone, Copy)]
pub struct CbzWriter {
    compression: CompressionMethod,
}

impl Default for CbzWriter {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }
}

#[async_trait]
impl ArchiveWriter for CbzWriter {
    async fn write(
        &self,
        output_path: &Path,
        members: Vec<PackedMember>,
        overwrite: bool,
    ) -> Result<u64> {
        let output_path = output_path.to_path_buf();
        let compression = self.compression;
        spawn_blocking(move || write_cbz(&output_path, members, compression, overwrite))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))?
    }
}

/// Writes the archive to a hidden temporary file next to `output_path` and
/// renames it into place once complete.
fn write_cbz(
    output_path: &Path,
    members: Vec<PackedMember>,
    compression: CompressionMethod,
    overwrite: bool,
) -> Result<u64> {
    let parent = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| Error::write(output_path, e))?;

    let temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", get_file_name_lossy(output_path)))
        .suffix(".part")
        .tempfile_in(&parent)
        .map_err(|e| Error::write(output_path, e))?;

    let options = SimpleFileOptions::default()
        .compression_method(compression)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(temp);
    for member in members {
        zip.start_file(member.name.as_str(), options)
            .map_err(|e| Error::write(output_path, format!("'{}': {e}", member.name)))?;
        zip.write_all(&member.data)
            .map_err(|e| Error::write(output_path, format!("'{}': {e}", member.name)))?;
    }
    let temp = zip.finish().map_err(|e| Error::write(output_path, e))?;

    temp.as_file()
        .sync_all()
        .map_err(|e| Error::write(output_path, e))?;
    let size = temp
        .as_file()
        .metadata()
        .map_err(|e| Error::write(output_path, e))?
        .len();

    let persisted = if overwrite {
        temp.persist(output_path)
    } else {
        temp.persist_noclobber(output_path)
    };
    persisted.map_err(|e| Error::write(output_path, e.error))?;

    Ok(size)
}
