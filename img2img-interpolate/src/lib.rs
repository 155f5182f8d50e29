//! Image-to-image latent interpolation: a seed image is partially noised in latent space,
//! denoised towards a prompt and the path between the two latents is rendered as a video.

pub mod checkpoint;
pub mod context;
pub mod error;
pub mod interpolation;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod prompt;
pub mod request;
pub mod request_log;
pub mod server;
pub mod settings;
pub mod video;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
