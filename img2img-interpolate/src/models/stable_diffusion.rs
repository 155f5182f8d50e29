// sampling follows the candle stable-diffusion example: https://github.com/huggingface/candle/tree/main/candle-examples/examples/stable-diffusion

use {
    std::{path::Path, sync::Arc},
    candle::{DType, Device, Module, Tensor},
    candle_transformers::models::stable_diffusion::{
        self,
        clip::ClipTextTransformer,
        ddim::DDIMSchedulerConfig,
        schedulers::{PredictionType, SchedulerConfig},
        unet_2d::UNet2DConditionModel,
        vae::AutoEncoderKL,
        StableDiffusionConfig,
    },
    tokenizers::Tokenizer,
    tracing::{debug, info, warn},
    crate::{
        checkpoint::{self, ModelFiles},
        error::{Error, Result},
        request::DeviceChoice,
        settings::{ModelSettings, ModelVersion},
    },
    super::{
        noise::seeded_randn,
        Conditioning,
        ImageEncoder,
        LatentDecoder,
        LatentSampler,
        ModelSession,
        Placement,
        Runtime,
        SamplingParams,
        Stage,
        TextConditioner,
    },
};

const VAE_SCALE: f64 = 0.18215;
const END_OF_TEXT: &str = "<|endoftext|>";

pub fn load(ckpt_dir: &Path, settings: &ModelSettings) -> Result<ModelSession> {
    let files = ModelFiles::resolve(ckpt_dir, settings)?;
    checkpoint::inventory(&files.unet)?;

    let device = match settings.device {
        Some(DeviceChoice::Cpu) => Device::Cpu,
        Some(DeviceChoice::Cuda) => Device::new_cuda(0)?,
        None => Device::cuda_if_available(0)?,
    };
    warn_if_unseedable(&device);
    let dtype = if settings.full_precision || device.is_cpu() { DType::F32 } else { DType::F16 };
    info!("loading stable diffusion {:?} from {} on {:?} ({:?})", settings.version, ckpt_dir.display(), device, dtype);

    let (sd_config, prediction_type) = match settings.version {
        ModelVersion::V1_5 => (StableDiffusionConfig::v1_5(settings.sliced_attention_size, None, None), PredictionType::Epsilon),
        ModelVersion::V2_1 => (StableDiffusionConfig::v2_1(settings.sliced_attention_size, None, None), PredictionType::VPrediction),
    };

    let tokenizer = Tokenizer::from_file(&files.tokenizer)?;
    let text_model = stable_diffusion::build_clip_transformer(&sd_config.clip, &files.clip, &device, DType::F32)?;
    let vae = sd_config.build_vae(&files.vae, &device, dtype)?;
    let unet = sd_config.build_unet(&files.unet, &device, 4, settings.use_flash_attn, dtype)?;
    info!("model loaded");

    let pad_with = sd_config.clip.pad_with.clone().unwrap_or(END_OF_TEXT.to_owned());
    let pad_id = *tokenizer.get_vocab(true)
        .get(pad_with.as_str())
        .ok_or_else(|| Error::Tokenizer(format!("padding token {} is not in the vocabulary", pad_with)))?;

    let first_stage = Arc::new(FirstStage {
        vae,
        device: device.clone(),
        dtype,
    });

    Ok(ModelSession {
        encoder: first_stage.clone(),
        conditioner: Arc::new(CondStage {
            tokenizer,
            text_model,
            pad_id,
            max_position_embeddings: sd_config.clip.max_position_embeddings,
            device: device.clone(),
        }),
        sampler: Arc::new(UnetStage {
            unet,
            prediction_type,
            device: device.clone(),
            dtype,
        }),
        decoder: first_stage,
        runtime: Arc::new(CandleRuntime {
            placement: Placement {
                device: if device.is_cpu() { DeviceChoice::Cpu } else { DeviceChoice::Cuda },
                full_precision: dtype == DType::F32,
            },
            device,
        }),
    })
}

fn warn_if_unseedable(device: &Device) {
    if device.is_cpu() {
        warn!("model is placed on the cpu: the first stage posterior sample cannot be seeded, reruns with the same seed are not byte-identical");
    }
}

struct FirstStage {
    vae: AutoEncoderKL,
    device: Device,
    dtype: DType,
}

impl ImageEncoder for FirstStage {
    fn encode(&self, image: &Tensor) -> Result<Tensor> {
        let image = image.to_device(&self.device)?.to_dtype(self.dtype)?;
        let latent = self.vae.encode(&image)?.sample()?;
        Ok((latent * VAE_SCALE)?)
    }
}

impl LatentDecoder for FirstStage {
    fn decode(&self, latent: &Tensor) -> Result<Tensor> {
        let latent = latent.to_device(&self.device)?.to_dtype(self.dtype)?;
        let image = self.vae.decode(&(latent / VAE_SCALE)?)?;
        Ok(image.to_dtype(DType::F32)?)
    }
}

struct CondStage {
    tokenizer: Tokenizer,
    text_model: ClipTextTransformer,
    pad_id: u32,
    max_position_embeddings: usize,
    device: Device,
}

impl TextConditioner for CondStage {
    fn condition(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self.tokenizer.encode(prompt, true)?.get_ids().to_vec();
        if tokens.len() > self.max_position_embeddings {
            debug!("prompt has {} tokens, truncating to {}", tokens.len(), self.max_position_embeddings);
            tokens.truncate(self.max_position_embeddings);
        }
        while tokens.len() < self.max_position_embeddings {
            tokens.push(self.pad_id);
        }

        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

struct UnetStage {
    unet: UNet2DConditionModel,
    prediction_type: PredictionType,
    device: Device,
    dtype: DType,
}

impl UnetStage {
    fn predict_noise(&self, latents: &Tensor, timestep: usize, conditioning: &Conditioning, params: &SamplingParams) -> Result<Tensor> {
        let cond = conditioning.cond.to_device(&self.device)?.to_dtype(self.dtype)?;

        let Some(uncond) = &conditioning.uncond else {
            return Ok(self.unet.forward(latents, timestep as f64, &cond)?);
        };
        let uncond = uncond.to_device(&self.device)?.to_dtype(self.dtype)?;

        let (noise_pred_uncond, noise_pred_text) = if params.unet_batch_size >= 2 {
            let latent_model_input = Tensor::cat(&[latents, latents], 0)?;
            let text_embeddings = Tensor::cat(&[&uncond, &cond], 0)?;
            let noise_pred = self.unet.forward(&latent_model_input, timestep as f64, &text_embeddings)?.chunk(2, 0)?;
            (noise_pred[0].clone(), noise_pred[1].clone())
        } else {
            (
                self.unet.forward(latents, timestep as f64, &uncond)?,
                self.unet.forward(latents, timestep as f64, &cond)?,
            )
        };

        Ok((&noise_pred_uncond + ((noise_pred_text - &noise_pred_uncond)? * params.guidance_scale)?)?)
    }
}

impl LatentSampler for UnetStage {
    fn sample(&self, init_latent: &Tensor, conditioning: &Conditioning, params: &SamplingParams) -> Result<Tensor> {
        if params.t_enc == 0 {
            return Ok(init_latent.clone());
        }

        let mut scheduler = DDIMSchedulerConfig {
            eta: params.eta,
            prediction_type: self.prediction_type,
            ..Default::default()
        }.build(params.steps)?;

        let timesteps = scheduler.timesteps().to_vec();
        let t_start = timesteps.len().saturating_sub(params.t_enc);

        let latents = init_latent.to_device(&self.device)?.to_dtype(self.dtype)?;
        let noise = seeded_randn(latents.dims(), params.seed, &self.device)?.to_dtype(self.dtype)?;
        let mut latents = scheduler.add_noise(&latents, noise, timesteps[t_start])?;

        for (timestep_index, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            debug!("running timestep index: {}", timestep_index);

            let latent_model_input = scheduler.scale_model_input(latents.clone(), timestep)?;
            let noise_pred = self.predict_noise(&latent_model_input, timestep, conditioning, params)?;
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        Ok(latents)
    }
}

/// Weights stay on their device for the lifetime of the session, so a release only waits for the
/// device queue to drain.
struct CandleRuntime {
    device: Device,
    placement: Placement,
}

impl Runtime for CandleRuntime {
    fn placement(&self) -> Placement {
        self.placement
    }

    fn seed(&self, seed: u64) -> Result<()> {
        // the cpu backend has no seedable generator
        if !self.device.is_cpu() {
            self.device.set_seed(seed)?;
        }
        Ok(())
    }

    fn release(&self, stage: Stage) -> Result<()> {
        debug!(%stage, "waiting for device");
        Ok(self.device.synchronize()?)
    }
}
