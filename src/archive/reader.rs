use crate::archive::ArchiveReader;
use crate::config::ConversionConfig;
use crate::error::{Error, Result};
use crate::path_utils::{member_relative_path, path_to_string_lossy};
use crate::types::{ContainerKind, MemberEntry};
use async_trait::async_trait;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;
use zip::ZipArchive;

/// Name of the RAR extraction executable.
pub const UNRAR_PROGRAM: &str = "unrar";

/// Upper bound for the initial buffer of one member; larger members grow on demand.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Reads zip containers in-process and rar containers through `unrar`.
#[derive(Debug, Clone, Default)]
pub struct SystemArchiveReader {
    unrar: Option<PathBuf>,
}

impl SystemArchiveReader {
    pub fn new(unrar: Option<PathBuf>) -> Self {
        Self { unrar }
    }

    /// Looks up `unrar` (explicit path from the config, otherwise `PATH`).
    ///
    /// A missing `unrar` is not fatal: zip-based archives still work and every
    /// rar-based archive fails on its own.
    pub fn locate(config: &ConversionConfig) -> Self {
        let unrar = config
            .unrar_path
            .clone()
            .or_else(|| which::which(UNRAR_PROGRAM).ok());
        match &unrar {
            Some(path) => log::debug!("using extractor {}", path_to_string_lossy(path)),
            None => log::warn!("{UNRAR_PROGRAM} not found in PATH; cbr files in rar format will fail"),
        }
        Self::new(unrar)
    }

    async fn read_rar(&self, path: &Path, workspace: &Path) -> Result<Vec<MemberEntry>> {
        let unrar = self.unrar.as_ref().ok_or_else(|| {
            Error::extraction(path, format!("{UNRAR_PROGRAM} is required for rar archives"))
        })?;

        // `lb` prints bare member names in archive order, directories included
        let listing = run_unrar(unrar, path, &["lb", "-p-", "--"], None).await?;
        let names: Vec<String> = String::from_utf8_lossy(&listing)
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(|line| {
                if MAIN_SEPARATOR == '/' {
                    line.to_string()
                } else {
                    line.replace(MAIN_SEPARATOR, "/")
                }
            })
            .collect();

        let extract_dir = workspace.join("extracted");
        tokio::fs::create_dir_all(&extract_dir).await?;
        let destination = format!("{}{}", path_to_string_lossy(&extract_dir), MAIN_SEPARATOR);
        run_unrar(
            unrar,
            path,
            &["x", "-p-", "-o+", "-y", "--"],
            Some(&destination),
        )
        .await?;

        let archive_path = path.to_path_buf();
        let read_dir = extract_dir.clone();
        let members = spawn_blocking(move || collect_extracted(&archive_path, &read_dir, &names))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        // the bytes live in memory now, free the disk space early
        let _ = tokio::fs::remove_dir_all(&extract_dir).await;
        Ok(members)
    }
}

#[async_trait]
impl ArchiveReader for SystemArchiveReader {
    async fn open(
        &self,
        path: &Path,
        kind: ContainerKind,
        workspace: &Path,
    ) -> Result<Vec<MemberEntry>> {
        match kind {
            ContainerKind::Zip => {
                let path = path.to_path_buf();
                spawn_blocking(move || read_zip(&path))
                    .await
                    .map_err(|e| Error::AsyncTaskError(e.to_string()))?
            }
            ContainerKind::Rar => self.read_rar(path, workspace).await,
        }
    }
}

/// Reads every file member of a zip archive in central directory order.
pub fn read_zip(path: &Path) -> Result<Vec<MemberEntry>> {
    let file = File::open(path).map_err(|e| Error::extraction(path, e))?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| Error::extraction(path, e))?;

    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| Error::extraction(path, e))?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if member_relative_path(&name).is_none() {
            return Err(Error::extraction(
                path,
                format!("unsafe member name '{name}'"),
            ));
        }

        let mut data = Vec::with_capacity(entry.size().min(MAX_PREALLOCATION) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::extraction(path, format!("'{name}': {e}")))?;
        members.push(MemberEntry::new(name, data));
    }

    Ok(members)
}

/// Pairs the names listed by `unrar lb` with the files extracted below `dir`
/// and reads them, in listing order.
///
/// Listed names that resolve to directories are dropped. Every other name must
/// match an extracted file and every extracted file must be listed; anything
/// else means the listing and the extraction disagree (for example names that
/// `unrar` printed in a different encoding) and fails the archive rather than
/// losing a member.
fn collect_extracted(archive: &Path, dir: &Path, names: &[String]) -> Result<Vec<MemberEntry>> {
    let mut unclaimed: HashSet<PathBuf> = HashSet::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| Error::extraction(archive, e))?;
        if entry.file_type().is_file() {
            unclaimed.insert(entry.into_path());
        }
    }

    let mut files = Vec::with_capacity(unclaimed.len());
    for name in names {
        let relative = member_relative_path(name)
            .ok_or_else(|| Error::extraction(archive, format!("unsafe member name '{name}'")))?;
        let file = dir.join(relative);
        if unclaimed.remove(&file) {
            files.push((name, file));
        } else if !file.is_dir() {
            return Err(Error::extraction(
                archive,
                format!("'{name}' does not match an extracted file"),
            ));
        }
    }

    if !unclaimed.is_empty() {
        let mut stray: Vec<String> = unclaimed
            .iter()
            .map(|file| path_to_string_lossy(file.strip_prefix(dir).unwrap_or(file.as_path())))
            .collect();
        stray.sort();
        return Err(Error::extraction(
            archive,
            format!("extracted files missing from the listing: {}", stray.join(", ")),
        ));
    }

    files
        .par_iter()
        .map(|(name, file)| {
            std::fs::read(file)
                .map(|data| MemberEntry::new((*name).clone(), data))
                .map_err(|e| Error::extraction(archive, format!("'{name}': {e}")))
        })
        .collect()
}

async fn run_unrar(
    unrar: &Path,
    archive: &Path,
    args: &[&str],
    destination: Option<&str>,
) -> Result<Vec<u8>> {
    let mut command = Command::new(unrar);
    command
        .args(args)
        .arg(archive)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(destination) = destination {
        command.arg(destination);
    }

    let output = command.output().await.map_err(|e| {
        Error::extraction(
            archive,
            format!("could not start '{}': {e}", path_to_string_lossy(unrar)),
        )
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("{UNRAR_PROGRAM} exited with {}", output.status)
        } else {
            stderr
        };
        return Err(Error::extraction(archive, reason));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        dir
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_listing_order_wins_and_directories_are_dropped() {
        let dir = extracted(&[
            ("a.txt", b"last".as_slice()),
            ("sub/01.txt", b"one".as_slice()),
            ("z.txt", b"first".as_slice()),
        ]);
        let members = collect_extracted(
            Path::new("comic.cbr"),
            dir.path(),
            &names(&["z.txt", "sub", "sub/01.txt", "a.txt"]),
        )
        .unwrap();

        let listed: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(listed, vec!["z.txt", "sub/01.txt", "a.txt"]);
        assert_eq!(members[0].data, b"first");
        assert_eq!(members[1].data, b"one");
    }

    #[test]
    fn test_listed_name_without_file_fails() {
        // the listing mangled a non-ascii name
        let dir = extracted(&[
            ("01.jpg", b"page".as_slice()),
            ("caf\u{e9}.png", b"page".as_slice()),
        ]);
        let result = collect_extracted(
            Path::new("comic.cbr"),
            dir.path(),
            &names(&["01.jpg", "caf?.png"]),
        );
        match result {
            Err(Error::Extraction { reason, .. }) => assert!(reason.contains("caf?.png")),
            other => panic!("expected an extraction error, got {other:?}"),
        }
    }

    #[test]
    fn test_unlisted_file_fails() {
        let dir = extracted(&[
            ("01.jpg", b"page".as_slice()),
            ("02.jpg", b"page".as_slice()),
        ]);
        let result = collect_extracted(Path::new("comic.cbr"), dir.path(), &names(&["01.jpg"]));
        match result {
            Err(Error::Extraction { reason, .. }) => assert!(reason.contains("02.jpg")),
            other => panic!("expected an extraction error, got {other:?}"),
        }
    }
}
