//! Capabilities the pipeline consumes from the generative model.
//!
//! The pipeline never touches network weights directly: it encodes, conditions, samples and
//! decodes through the traits below. [`ModelSession`] owns one implementation of each and is
//! built once at startup.

use {
    std::{fmt, sync::Arc},
    candle::Tensor,
    tracing::debug,
    crate::{error::Result, request::DeviceChoice},
};

pub mod noise;
pub mod stable_diffusion;

/// Text conditioning for the sampler. `uncond` is only present when guidance is requested.
#[derive(Debug, Clone)]
pub struct Conditioning {
    pub cond: Tensor,
    pub uncond: Option<Tensor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub steps: usize,
    /// Number of trailing timesteps to denoise, `floor(strength * steps)`.
    pub t_enc: usize,
    pub guidance_scale: f64,
    pub eta: f64,
    pub seed: u64,
    /// Latent rows per UNet call: 2 runs uncond and cond together, 1 runs them separately.
    pub unet_batch_size: usize,
}

/// Where the session's weights live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub device: DeviceChoice,
    pub full_precision: bool,
}

/// Model partitions that are loaded and released independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The autoencoder: image encoding and latent decoding.
    FirstStage,
    /// The text encoder.
    CondStage,
    Unet,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::FirstStage => "first stage",
            Stage::CondStage => "cond stage",
            Stage::Unet => "unet",
        })
    }
}

pub trait ImageEncoder: Send + Sync {
    /// Maps a `B×3×H×W` image in `[-1, 1]` to a scaled `B×4×H/8×W/8` latent.
    fn encode(&self, image: &Tensor) -> Result<Tensor>;
}

pub trait TextConditioner: Send + Sync {
    /// Encodes one prompt into a `1×seq×dim` conditioning vector.
    fn condition(&self, prompt: &str) -> Result<Tensor>;
}

pub trait LatentSampler: Send + Sync {
    fn sample(&self, init_latent: &Tensor, conditioning: &Conditioning, params: &SamplingParams) -> Result<Tensor>;
}

pub trait LatentDecoder: Send + Sync {
    /// Maps a latent back to a `B×3×H×W` image, roughly in `[-1, 1]`.
    fn decode(&self, latent: &Tensor) -> Result<Tensor>;
}

/// Device-level control: seeding and stage residency.
pub trait Runtime: Send + Sync {
    fn placement(&self) -> Placement;

    fn seed(&self, seed: u64) -> Result<()>;

    fn load(&self, _stage: Stage) -> Result<()> {
        Ok(())
    }

    /// Returns once the device has released the stage's memory.
    fn release(&self, _stage: Stage) -> Result<()> {
        Ok(())
    }
}

pub struct ModelSession {
    pub encoder: Arc<dyn ImageEncoder>,
    pub conditioner: Arc<dyn TextConditioner>,
    pub sampler: Arc<dyn LatentSampler>,
    pub decoder: Arc<dyn LatentDecoder>,
    pub runtime: Arc<dyn Runtime>,
}

impl ModelSession {
    pub fn placement(&self) -> Placement {
        self.runtime.placement()
    }

    /// Runs `f` with `stage` loaded. The stage is released afterwards unless `keep_resident` is set,
    /// including when `f` fails.
    pub fn staged<T>(&self, stage: Stage, keep_resident: bool, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        debug!(%stage, "loading stage");
        self.runtime.load(stage)?;

        let result = f(self);

        if !keep_resident {
            debug!(%stage, "releasing stage");
            self.runtime.release(stage)?;
        }

        result
    }
}
