use {
    std::path::{Path, PathBuf},
    crate::{
        models::ModelSession,
        request_log::RequestLog,
        video::VideoEncoder,
    },
};

/// Everything a generation needs besides the request itself.
pub struct Context {
    models: ModelSession,
    video_encoder: Box<dyn VideoEncoder>,
    request_log: RequestLog,
    video_path: PathBuf,
    fps: u32,
}

impl Context {
    pub fn new(
        models: ModelSession,
        video_encoder: Box<dyn VideoEncoder>,
        request_log: RequestLog,
        video_path: impl Into<PathBuf>,
        fps: u32,
    ) -> Self {
        Self {
            models,
            video_encoder,
            request_log,
            video_path: video_path.into(),
            fps,
        }
    }

    pub fn models(&self) -> &ModelSession {
        &self.models
    }

    pub fn video_encoder(&self) -> &dyn VideoEncoder {
        self.video_encoder.as_ref()
    }

    pub fn request_log(&self) -> &RequestLog {
        &self.request_log
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}
