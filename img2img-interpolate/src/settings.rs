use {
    std::path::PathBuf,
    config::Config,
    crate::{
        error::{Error, Result},
        request::DeviceChoice,
        video::DEFAULT_FPS,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVersion {
    V1_5,
    V2_1,
}

impl ModelVersion {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "v1_5" | "v1-5" | "1.5" => Ok(Self::V1_5),
            "v2_1" | "v2-1" | "2.1" => Ok(Self::V2_1),
            other => Err(Error::Checkpoint(format!("unsupported model version \"{}\"", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub version: ModelVersion,
    pub tokenizer: PathBuf,
    pub clip_weights: PathBuf,
    pub vae_weights: PathBuf,
    pub unet_weights: PathBuf,
    /// `None` picks cuda when available.
    pub device: Option<DeviceChoice>,
    pub full_precision: bool,
    pub sliced_attention_size: Option<usize>,
    pub use_flash_attn: bool,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub video_path: PathBuf,
    pub fps: u32,
    pub request_log: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub ffmpeg: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub output: OutputSettings,
    pub video: VideoSettings,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let string = |key: &str, default: &str| config.get_string(key).unwrap_or(default.to_owned());

        let port = config.get_int("server.port").unwrap_or(7860);
        let port = u16::try_from(port)
            .map_err(|_| Error::Config(config::ConfigError::Message(format!("server.port is out of range: {}", port))))?;

        let device = match config.get_string("model.device") {
            Ok(device) => Some(device.parse()?),
            Err(_) => None,
        };

        let fps = config.get_int("output.fps").unwrap_or(DEFAULT_FPS as i64);
        let fps = u32::try_from(fps)
            .ok()
            .filter(|fps| *fps > 0)
            .ok_or_else(|| Error::Config(config::ConfigError::Message(format!("output.fps must be positive, got {}", fps))))?;

        Ok(Self {
            server: ServerSettings {
                host: string("server.host", "0.0.0.0"),
                port,
            },
            model: ModelSettings {
                version: ModelVersion::parse(&string("model.version", "v1_5"))?,
                tokenizer: string("model.tokenizer", "tokenizer.json").into(),
                clip_weights: string("model.clip_weights", "clip.safetensors").into(),
                vae_weights: string("model.vae_weights", "vae.safetensors").into(),
                unet_weights: string("model.unet_weights", "unet.safetensors").into(),
                device,
                full_precision: config.get_bool("model.full_precision").unwrap_or(false),
                sliced_attention_size: config.get_int("model.sliced_attention_size").ok().map(|size| size.max(0) as usize),
                use_flash_attn: config.get_bool("model.use_flash_attn").unwrap_or(false),
            },
            output: OutputSettings {
                video_path: string("output.video_path", "tempfile.mp4").into(),
                fps,
                request_log: string("output.request_log", "logs/img2img_gradio_logs.csv").into(),
            },
            video: VideoSettings {
                ffmpeg: string("video.ffmpeg", "ffmpeg"),
            },
        })
    }
}
