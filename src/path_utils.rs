//! Path utilities for mirroring the input tree and naming archive members.
//!
//! Filesystem paths (inputs, outputs) use [`Path`]; names inside archives are
//! always `/`-separated strings and are handled as such, never through
//! [`Path`], so that they survive verbatim on every platform.

use crate::error::{Error, Result};

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Extension given to every output archive.
pub const OUTPUT_EXTENSION: &str = "cbz";

/// Input extensions considered during discovery (compared case-insensitively).
pub const COMIC_EXTENSIONS: [&str; 2] = ["cbz", "cbr"];

lazy_static! {
    /// Members that carry no content: Windows thumbnail caches, macOS folder
    /// metadata and SFV checksum lists.
    static ref JUNK_MEMBER_REGEX: Regex =
        Regex::new(r"(?i)(^|/)(thumbs\.db|\.ds_store|[^/]*\.sfv)$").unwrap();
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Gets the file name from a path with fallback to lossy conversion.
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Checks if a filename starts with a dot (hidden file).
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// True for `.cbz` / `.cbr` files, whatever the case of the extension.
pub fn has_comic_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            COMIC_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Computes where an input archive lands under the output root.
///
/// Returns the input's path relative to `input_root` and the mirrored output
/// path, whose extension is always `.cbz`.
///
/// # Example
///
/// `root/sub/a.cbr` with output root `out/` maps to (`sub/a.cbr`, `out/sub/a.cbz`).
pub fn mirror_output_path(
    input_root: &Path,
    output_root: &Path,
    input: &Path,
) -> Result<(PathBuf, PathBuf)> {
    let relative = input.strip_prefix(input_root).map_err(|_| {
        Error::InvalidPath(
            input.to_path_buf(),
            format!("not inside '{}'", path_to_string_lossy(input_root)),
        )
    })?;

    if relative.file_name().is_none() {
        return Err(Error::InvalidPath(
            input.to_path_buf(),
            "path has no file name".to_string(),
        ));
    }

    let output = output_root.join(relative).with_extension(OUTPUT_EXTENSION);
    Ok((relative.to_path_buf(), output))
}

/// True when `path` lies somewhere below `dir`.
pub fn is_inside(path: &Path, dir: &Path) -> bool {
    path != dir && path.starts_with(dir)
}

/// Validates an archive member name and turns it into a relative path.
///
/// Absolute names and names climbing out with `..` are rejected, so a
/// member can never be written outside of its workspace.
pub fn member_relative_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Replaces the extension of an archive member name, keeping its directories.
///
/// `ch1/01.jpg` becomes `ch1/01.jxl`; names without an extension get one.
pub fn swap_member_extension(name: &str, extension: &str) -> String {
    let file_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let file_name = &name[file_start..];
    let stem_len = match file_name.rfind('.') {
        Some(dot) if dot > 0 => dot,
        _ => file_name.len(),
    };
    format!("{}.{}", &name[..file_start + stem_len], extension)
}

/// Appends an extension to a member name: `01.png` becomes `01.png.jxl`.
pub fn append_member_extension(name: &str, extension: &str) -> String {
    format!("{}.{}", name, extension)
}

/// True for members that are dropped when junk stripping is enabled.
pub fn is_junk_member(name: &str) -> bool {
    JUNK_MEMBER_REGEX.is_match(name)
}
