//! Codec module provides the image transcoding interface and its implementations.
//!
//! The scheduler only ever talks to the [`Codec`] trait, so tests can swap the
//! external encoder for an in-process fake.

use crate::error::ConversionFailure;
use crate::types::ImageKind;
use async_trait::async_trait;
use std::path::Path;

pub mod cjxl;

pub use cjxl::CjxlCodec;

/// Common interface for image transcoders.
///
/// Implementations must be reentrant: the scheduler calls [`convert`](Codec::convert)
/// from many tasks at once and shares one instance between all of them.
#[async_trait]
pub trait Codec: Send + Sync {
    /// Extension of the produced files, without the dot (e.g. `"jxl"`).
    fn output_extension(&self) -> &str;

    /// Transcodes one image.
    ///
    /// # Parameters
    /// * `source` - The raw bytes of the source image
    /// * `kind` - The detected source format; may select a different strategy
    /// * `scratch_dir` - Job-scoped directory for temporary files
    ///
    /// # Returns
    /// * `Ok(Vec<u8>)` - The converted image
    /// * `Err(ConversionFailure)` - The image could not be converted
    async fn convert(
        &self,
        source: &[u8],
        kind: ImageKind,
        scratch_dir: &Path,
    ) -> std::result::Result<Vec<u8>, ConversionFailure>;
}
