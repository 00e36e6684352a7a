//! Discovery of comic archives below an input root.
//!
//! The walker produces one [`ArchiveJob`] per `.cbz`/`.cbr` file, lazily, in
//! file-name order. The container kind comes from the file's magic bytes, so
//! a `.cbr` that is really a zip is read as a zip. Symbolic links are
//! followed; walkdir reports link loops, which are skipped like any other
//! unreadable entry. Problems with single files are logged at `warn` and
//! skipped; only an unusable root is an error.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::classifier::{CONTAINER_SNIFF_LEN, sniff_container};
use crate::error::{Error, Result};
use crate::path_utils::{has_comic_extension, is_hidden_file, is_inside, mirror_output_path};
use crate::types::{ArchiveJob, ContainerKind};

/// Finds comic archives in a directory tree.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    input_root: PathBuf,
    output_root: PathBuf,
    skip_hidden: bool,
}

impl TreeWalker {
    /// Creates a walker for `input_root`, mirroring into `output_root`.
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            skip_hidden: false,
        }
    }

    /// Whether hidden files and directories (leading dot) are ignored. Default: false.
    pub fn skip_hidden(mut self, skip_hidden: bool) -> Self {
        self.skip_hidden = skip_hidden;
        self
    }

    /// Starts the traversal.
    ///
    /// # Returns
    ///
    /// * `Ok(Discovery)` - A lazy iterator of jobs
    /// * `Err(Error::Discovery)` - The root does not exist, is not a directory or cannot be read
    pub fn discover(&self) -> Result<Discovery> {
        let root = &self.input_root;
        if !root.exists() {
            return Err(Error::discovery(root, "input directory does not exist"));
        }
        if !root.is_dir() {
            return Err(Error::discovery(root, "input path is not a directory"));
        }
        std::fs::read_dir(root).map_err(|e| Error::discovery(root, e))?;

        let input_root = root.canonicalize().map_err(|e| Error::discovery(root, e))?;
        let output_root = absolute(&self.output_root)?;

        // an output tree living inside the input tree must not be re-read
        let nested_output = is_inside(&output_root, &input_root).then(|| output_root.clone());

        let walker = WalkDir::new(&input_root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        Ok(Discovery {
            walker,
            input_root,
            output_root,
            nested_output,
            skip_hidden: self.skip_hidden,
            seen_outputs: HashSet::new(),
        })
    }
}

/// Lazy sequence of discovered archives. See [`TreeWalker::discover`].
pub struct Discovery {
    walker: walkdir::IntoIter,
    input_root: PathBuf,
    output_root: PathBuf,
    nested_output: Option<PathBuf>,
    skip_hidden: bool,
    seen_outputs: HashSet<PathBuf>,
}

impl Discovery {
    pub fn input_root(&self) -> &Path {
        &self.input_root
    }
}

impl Iterator for Discovery {
    type Item = ArchiveJob;

    fn next(&mut self) -> Option<ArchiveJob> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            let file_type = entry.file_type();

            if entry.depth() > 0 && self.skip_hidden && is_hidden_file(path) {
                if file_type.is_dir() {
                    log::warn!("Skipping hidden directory {}", path.display());
                    self.walker.skip_current_dir();
                } else if has_comic_extension(path) {
                    log::warn!("Skipping hidden archive {}", path.display());
                }
                continue;
            }

            if file_type.is_dir() {
                if self.nested_output.as_deref() == Some(path) {
                    log::debug!("not descending into output directory {}", path.display());
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !has_comic_extension(path) {
                continue;
            }
            if !file_type.is_file() {
                log::warn!("Skipping {}: not a regular file", path.display());
                continue;
            }

            let kind = match sniff_file(path) {
                Ok(Some(kind)) => kind,
                Ok(None) => {
                    log::warn!(
                        "Skipping {}: content is neither a zip nor a rar archive",
                        path.display()
                    );
                    continue;
                }
                Err(e) => {
                    log::warn!("Skipping unreadable file {}: {e}", path.display());
                    continue;
                }
            };

            let (relative, output) =
                match mirror_output_path(&self.input_root, &self.output_root, path) {
                    Ok(paths) => paths,
                    Err(e) => {
                        log::warn!("Skipping {}: {e}", path.display());
                        continue;
                    }
                };

            let mut job = ArchiveJob::new(path.to_path_buf(), relative, output, kind);
            if !self.seen_outputs.insert(job.output_path.clone()) {
                log::warn!(
                    "{} maps to {}, which another archive already uses",
                    job.relative_path.display(),
                    job.output_path.display()
                );
                job.collision = true;
            }
            return Some(job);
        }
    }
}

/// Reads the first bytes of a file and detects its container kind.
pub fn sniff_file(path: &Path) -> std::io::Result<Option<ContainerKind>> {
    let mut header = Vec::with_capacity(CONTAINER_SNIFF_LEN);
    File::open(path)?
        .take(CONTAINER_SNIFF_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(sniff_container(&header))
}

/// Resolves `path` like `canonicalize`, also for paths that do not exist yet:
/// the deepest existing ancestor is canonicalized and the rest appended.
fn absolute(path: &Path) -> Result<PathBuf> {
    let path = std::path::absolute(path)
        .map_err(|e| Error::InvalidPath(path.to_path_buf(), format!("Cannot resolve path: {e}")))?;
    for ancestor in path.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            return Ok(match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
                _ => canonical,
            });
        }
    }
    Ok(path)
}
