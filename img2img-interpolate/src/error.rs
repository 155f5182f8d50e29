//! Error types for the interpolation pipeline.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Strength outside of `[0.0, 1.0]`.
    #[error("can only work with strength in [0.0, 1.0], got {0}")]
    InvalidStrength(f64),

    /// Any other request parameter outside of its allowed range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },

    #[error("image is too small: {width}x{height}, both dimensions must be at least 64")]
    ImageTooSmall {
        width: u32,
        height: u32,
    },

    #[error("could not decode input image: {0}")]
    ImageDecode(image::ImageError),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("candle: {0}")]
    Candle(#[from] candle::Error),

    #[error("tokenizer: {0}")]
    Tokenizer(String),

    #[error("checkpoint: {0}")]
    Checkpoint(String),

    /// A decoded latent that does not form an RGB image.
    #[error("decode: {0}")]
    Decode(String),

    #[error("video: {0}")]
    Video(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("request log: {0}")]
    RequestLog(#[from] csv::Error),

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Errors caused by the request itself rather than by the model or the environment.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Error::InvalidStrength(_) | Error::InvalidParameter { .. } | Error::ImageTooSmall { .. } | Error::ImageDecode(_))
    }
}

impl From<tokenizers::Error> for Error {
    fn from(error: tokenizers::Error) -> Self {
        Error::Tokenizer(error.to_string())
    }
}
