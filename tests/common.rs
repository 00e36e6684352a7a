//! Common test utilities and fakes for the comic-squash crate.
//!
//! Provides unique scratch directories, fixture archives and images, and
//! in-process stand-ins for the external encoder and extractor.

use async_trait::async_trait;
use comic_squash::error::{ConversionFailure, Error, Result};
use comic_squash::prelude::*;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use rand::{Rng, distributions::Alphanumeric};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::fs;
use zip::write::SimpleFileOptions;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Scratch layout of one test: `base/input`, `base/output`, `base/work`.
#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub work: PathBuf,
}

/// Creates a fresh, uniquely named test directory with input, output and work subdirectories.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let unique_sub_path = format!("{}-{}", sub_path, rand_string);
    let base = PathBuf::from(TEST_TMP_DIR).join(unique_sub_path);
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }
    let input = base.join("input");
    let output = base.join("output");
    let work = base.join("work");

    fs::create_dir_all(&input).await.unwrap();
    fs::create_dir_all(&work).await.unwrap();

    TestDirs {
        base,
        input,
        output,
        work,
    }
}

impl TestDirs {
    /// Removes the whole scratch directory of the test.
    #[allow(dead_code)]
    pub async fn cleanup(self) {
        let _ = fs::remove_dir_all(&self.base).await;
    }
}

/// Encodes a small single-color JPEG.
#[allow(dead_code)]
pub fn jpeg_bytes(color: Rgb<u8>) -> Vec<u8> {
    let img = RgbImage::from_pixel(16, 16, color);
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
    buffer.into_inner()
}

/// Encodes a small single-color PNG.
#[allow(dead_code)]
pub fn png_bytes(color: Rgba<u8>) -> Vec<u8> {
    let img = RgbaImage::from_pixel(16, 16, color);
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Encodes a small single-color GIF.
#[allow(dead_code)]
pub fn gif_bytes(color: Rgba<u8>) -> Vec<u8> {
    let img = RgbaImage::from_pixel(16, 16, color);
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Gif).unwrap();
    buffer.into_inner()
}

/// Writes a zip archive with the given members, in order. The extension of
/// `path` does not matter: a `.cbr` written here is a zip in disguise.
#[allow(dead_code)]
pub fn create_archive(path: &Path, members: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in members {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

#[allow(dead_code)]
pub const COVER_TEXT: &[u8] = b"Scanned by nobody";

/// RAR 5 archive with stored members `z.txt`, `sub/`, `sub/01.txt` and
/// `a.txt`, in that order. See [`RAR_MEMBERS`].
#[allow(dead_code)]
pub const RAR_COMIC: &[u8] = &[
    0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x01, 0x00, 0xc5, 0x1a, 0x33, 0x32,
    0x03, 0x01, 0x00, 0x00, 0xcc, 0x45, 0x34, 0x0c, 0x14, 0x02, 0x02, 0x0b,
    0x04, 0x0b, 0xa4, 0x83, 0x02, 0x6e, 0x24, 0x16, 0xf0, 0x00, 0x01, 0x05,
    0x7a, 0x2e, 0x74, 0x78, 0x74, 0x66, 0x69, 0x72, 0x73, 0x74, 0x20, 0x65,
    0x6e, 0x74, 0x72, 0x79, 0xb6, 0x51, 0xbf, 0xff, 0x0d, 0x02, 0x00, 0x01,
    0x00, 0xed, 0x83, 0x01, 0x00, 0x01, 0x03, 0x73, 0x75, 0x62, 0x60, 0x27,
    0x44, 0x8b, 0x19, 0x02, 0x02, 0x03, 0x04, 0x03, 0xa4, 0x83, 0x02, 0xf1,
    0x86, 0x6c, 0x7a, 0x00, 0x01, 0x0a, 0x73, 0x75, 0x62, 0x2f, 0x30, 0x31,
    0x2e, 0x74, 0x78, 0x74, 0x6f, 0x6e, 0x65, 0x96, 0x51, 0x21, 0x11, 0x14,
    0x02, 0x02, 0x0a, 0x04, 0x0a, 0xa4, 0x83, 0x02, 0x7f, 0x14, 0x1e, 0xb3,
    0x00, 0x01, 0x05, 0x61, 0x2e, 0x74, 0x78, 0x74, 0x6c, 0x61, 0x73, 0x74,
    0x20, 0x65, 0x6e, 0x74, 0x72, 0x79, 0x19, 0xb2, 0x3a, 0x35, 0x03, 0x05,
    0x00, 0x00,
];

/// File members of [`RAR_COMIC`] in archive order.
#[allow(dead_code)]
pub const RAR_MEMBERS: [(&str, &[u8]); 3] = [
    ("z.txt", b"first entry"),
    ("sub/01.txt", b"one"),
    ("a.txt", b"last entry"),
];

/// Writes a typical three-member comic: a JPEG page, a PNG page and a text file.
#[allow(dead_code)]
pub fn create_comic(path: &Path) {
    let jpeg = jpeg_bytes(Rgb([255, 0, 0]));
    let png = png_bytes(Rgba([0, 0, 255, 255]));
    create_archive(
        path,
        &[
            ("01.jpg", jpeg.as_slice()),
            ("02.png", png.as_slice()),
            ("cover.txt", COVER_TEXT),
        ],
    );
}

/// Reads every member of a zip archive as (name, bytes), in order.
#[allow(dead_code)]
pub fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = std::fs::File::open(path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut entry = zip.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

/// Member names of a zip archive, in order.
#[allow(dead_code)]
pub fn archive_names(path: &Path) -> Vec<String> {
    read_archive(path).into_iter().map(|(name, _)| name).collect()
}

/// In-process codec: prefixes the source with `JXL` and records concurrency.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeCodec {
    delay: Duration,
    fail_on: Vec<Vec<u8>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every conversion takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Conversions of exactly these bytes fail with an empty result.
    pub fn failing_on(mut self, source: Vec<u8>) -> Self {
        self.fail_on.push(source);
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// What a successful conversion of `source` returns.
    pub fn expected_output(source: &[u8]) -> Vec<u8> {
        let mut output = b"JXL".to_vec();
        output.extend_from_slice(source);
        output
    }
}

#[async_trait]
impl Codec for FakeCodec {
    fn output_extension(&self) -> &str {
        "jxl"
    }

    async fn convert(
        &self,
        source: &[u8],
        _kind: ImageKind,
        _scratch_dir: &Path,
    ) -> std::result::Result<Vec<u8>, ConversionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.iter().any(|f| f.as_slice() == source) {
            return Err(ConversionFailure::EmptyOutput);
        }
        Ok(Self::expected_output(source))
    }
}

/// Archive reader that fails for every archive whose file name contains `needle`.
#[allow(dead_code)]
pub struct FailingReader {
    inner: SystemArchiveReader,
    needle: String,
}

#[allow(dead_code)]
impl FailingReader {
    pub fn new(needle: &str) -> Self {
        Self {
            inner: SystemArchiveReader::default(),
            needle: needle.to_string(),
        }
    }
}

#[async_trait]
impl ArchiveReader for FailingReader {
    async fn open(
        &self,
        path: &Path,
        kind: ContainerKind,
        workspace: &Path,
    ) -> Result<Vec<MemberEntry>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.contains(&self.needle) {
            return Err(Error::Extraction {
                path: path.to_path_buf(),
                reason: "simulated extraction failure".to_string(),
            });
        }
        self.inner.open(path, kind, workspace).await
    }
}

/// Config for the scratch layout, with the workspace parent inside the test dir.
#[allow(dead_code)]
pub fn config_builder(dirs: &TestDirs) -> ConversionConfigBuilder {
    let mut builder = ConversionConfig::builder();
    builder
        .input_root(dirs.input.clone())
        .output_root(dirs.output.clone())
        .temp_dir(dirs.work.clone());
    builder
}

/// Scheduler with the real zip reader and writer and the given codec.
#[allow(dead_code)]
pub fn scheduler(config: ConversionConfig, codec: Arc<dyn Codec>) -> Scheduler {
    Scheduler::new(
        Arc::new(config),
        codec,
        Arc::new(SystemArchiveReader::default()),
        Arc::new(CbzWriter::default()),
        Arc::new(MagicClassifier),
    )
}

/// Number of entries left in a directory.
#[allow(dead_code)]
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
