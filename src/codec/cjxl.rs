use crate::codec::Codec;
use crate::config::ConversionConfig;
use crate::error::{ConversionFailure, Error, Result};
use crate::path_utils::path_to_string_lossy;
use crate::types::ImageKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;

/// Name of the reference JPEG XL encoder executable.
pub const CJXL_PROGRAM: &str = "cjxl";

/// Encoder parameters applied identically to every invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub effort: u8,
    pub brotli_effort: u8,
    pub distance: f32,
    pub quality: Option<f32>,
    pub modular_nb_prev_channels: u8,
    pub lossless_jpeg: bool,
    pub modular: Option<bool>,
    pub num_threads: usize,
}

impl From<&ConversionConfig> for EncoderSettings {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            effort: config.effort,
            brotli_effort: config.brotli_effort,
            distance: config.distance,
            quality: config.quality,
            modular_nb_prev_channels: config.modular_nb_prev_channels,
            lossless_jpeg: config.lossless_jpeg,
            modular: config.modular,
            num_threads: config.effective_codec_threads(),
        }
    }
}

/// A [`Codec`] running the external `cjxl` encoder once per image.
///
/// Each conversion writes the source into a scratch file inside the job
/// workspace, lets `cjxl` write its result next to it and reads the result
/// back. Both scratch files are removed when the call returns, and the child
/// process is killed if the call is cancelled.
#[derive(Debug, Clone)]
pub struct CjxlCodec {
    program: PathBuf,
    settings: EncoderSettings,
}

impl CjxlCodec {
    pub fn new(program: impl Into<PathBuf>, settings: EncoderSettings) -> Self {
        Self {
            program: program.into(),
            settings,
        }
    }

    /// Finds `cjxl` (explicit path from the config, otherwise `PATH`).
    pub fn locate(config: &ConversionConfig) -> Result<Self> {
        let program = match &config.cjxl_path {
            Some(path) if path.is_file() => path.clone(),
            Some(path) => {
                return Err(Error::ToolNotFound(format!(
                    "{} (configured path '{}' is not a file)",
                    CJXL_PROGRAM,
                    path_to_string_lossy(path)
                )));
            }
            None => which::which(CJXL_PROGRAM).map_err(|_| {
                Error::ToolNotFound(format!(
                    "{CJXL_PROGRAM}. Install libjxl and put cjxl in PATH"
                ))
            })?,
        };
        log::debug!("using encoder {}", path_to_string_lossy(&program));
        Ok(Self::new(program, EncoderSettings::from(config)))
    }

    /// Encoder flags for one source format, without the input and output paths.
    ///
    /// JPEG sources are the only ones receiving `--lossless_jpeg`: for them the
    /// encoder can repack the DCT coefficients instead of decoding pixels.
    pub fn arguments(&self, kind: ImageKind) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            format!("--effort={}", s.effort),
            format!("--brotli_effort={}", s.brotli_effort),
        ];
        match s.quality {
            Some(quality) => args.push(format!("--quality={}", quality)),
            None => args.push(format!("--distance={}", s.distance)),
        }
        args.push(format!(
            "--modular_nb_prev_channels={}",
            s.modular_nb_prev_channels
        ));
        args.push(format!("--num_threads={}", s.num_threads));
        if let Some(modular) = s.modular {
            args.push(format!("--modular={}", u8::from(modular)));
        }
        if kind == ImageKind::Jpeg {
            args.push(format!("--lossless_jpeg={}", u8::from(s.lossless_jpeg)));
        }
        args
    }
}

#[async_trait]
impl Codec for CjxlCodec {
    fn output_extension(&self) -> &str {
        "jxl"
    }

    async fn convert(
        &self,
        source: &[u8],
        kind: ImageKind,
        scratch_dir: &Path,
    ) -> std::result::Result<Vec<u8>, ConversionFailure> {
        let input = tempfile::Builder::new()
            .prefix("page-")
            .suffix(&format!(".{}", kind.extension()))
            .tempfile_in(scratch_dir)?
            .into_temp_path();
        fs::write(&input, source).await?;

        let output = tempfile::Builder::new()
            .prefix("page-")
            .suffix(".jxl")
            .tempfile_in(scratch_dir)?
            .into_temp_path();

        let args = self.arguments(kind);
        log::debug!(
            "{} {} {}",
            path_to_string_lossy(&self.program),
            args.join(" "),
            path_to_string_lossy(&input)
        );

        let result = Command::new(&self.program)
            .args(&args)
            .arg(&*input)
            .arg(&*output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConversionFailure::Spawn {
                program: path_to_string_lossy(&self.program),
                source,
            })?;

        if !result.status.success() {
            return Err(ConversionFailure::Exit {
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let converted = fs::read(&output).await?;
        if converted.is_empty() {
            return Err(ConversionFailure::EmptyOutput);
        }
        Ok(converted)
    }
}
