use {
    std::{fs::{self, OpenOptions}, path::{Path, PathBuf}},
    serde::Serialize,
    crate::{
        error::Result,
        request::{DeviceChoice, GenerationRequest, ImageFormat},
    },
};

pub const SAMPLER: &str = "ddim";

/// One row of the request log.
#[derive(Debug, Serialize)]
pub struct RequestLogRecord<'a> {
    pub timestamp: String,
    pub prompt: &'a str,
    pub strength: f64,
    pub ddim_steps: usize,
    pub n_iter: usize,
    pub batch_size: usize,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub scale: f64,
    pub ddim_eta: f64,
    pub unet_bs: usize,
    pub device: DeviceChoice,
    pub seed: u64,
    pub outdir: String,
    pub img_format: ImageFormat,
    pub turbo: bool,
    pub full_precision: bool,
    pub n_interpolate_samples: usize,
    pub sampler: &'static str,
}

impl<'a> RequestLogRecord<'a> {
    pub fn new(request: &'a GenerationRequest, seed: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            prompt: &request.prompt,
            strength: request.strength,
            ddim_steps: request.ddim_steps,
            n_iter: request.n_iter,
            batch_size: request.batch_size,
            height: request.height,
            width: request.width,
            scale: request.scale,
            ddim_eta: request.ddim_eta,
            unet_bs: request.unet_bs,
            device: request.device,
            seed,
            outdir: request.outdir.to_string_lossy().to_string(),
            img_format: request.img_format,
            turbo: request.turbo,
            full_precision: request.full_precision,
            n_interpolate_samples: request.n_interpolate_samples,
            sampler: SAMPLER,
        }
    }
}

/// Append-only CSV log with one row per request. The header is written when the file is new.
pub struct RequestLog {
    path: PathBuf,
}

impl RequestLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &RequestLogRecord<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let is_new = fs::metadata(&self.path).map(|metadata| metadata.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }
}
