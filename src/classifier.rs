//! Content-based classification of archives and archive members.
//!
//! Classification never looks at file names: comic archives routinely contain
//! mislabeled pages (a PNG named `.jpg`) and `.cbr` files that are really zip
//! containers. Only the leading magic bytes decide.

use crate::types::{ContainerKind, ImageKind, MemberKind};

/// Local file header signature of a zip archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// End-of-central-directory signature; an empty zip starts with it.
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
/// Shared prefix of RAR 1.5-4.x (`Rar!\x1a\x07\x00`) and RAR 5 (`Rar!\x1a\x07\x01\x00`).
const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07";

/// Number of leading bytes needed by [`sniff_container`].
pub const CONTAINER_SNIFF_LEN: usize = 8;

/// Decides what kind of member a blob of bytes is.
///
/// Implementations must be side-effect free and must not fail: anything they
/// cannot recognise is [`MemberKind::PassThrough`].
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, bytes: &[u8]) -> MemberKind;
}

/// Magic-byte classifier backed by `image::guess_format`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicClassifier;

impl ContentClassifier for MagicClassifier {
    fn classify(&self, bytes: &[u8]) -> MemberKind {
        image::guess_format(bytes)
            .ok()
            .and_then(ImageKind::from_image_format)
            .map(MemberKind::Image)
            .unwrap_or(MemberKind::PassThrough)
    }
}

/// Detects the container family of an archive from its first bytes.
pub fn sniff_container(header: &[u8]) -> Option<ContainerKind> {
    if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
        Some(ContainerKind::Zip)
    } else if header.starts_with(RAR_MAGIC) {
        Some(ContainerKind::Rar)
    } else {
        None
    }
}
