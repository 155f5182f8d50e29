//! One generation, from the uploaded image to the frame video.

use {
    std::path::PathBuf,
    rand::Rng,
    tracing::{info, warn},
    crate::{
        context::Context,
        error::Result,
        interpolation::{interpolate, video_sequence},
        models::{SamplingParams, Stage},
        output::SampleDirectory,
        preprocess::prepare_image,
        prompt::build_conditioning,
        request::{DeviceChoice, GenerationRequest},
        request_log::RequestLogRecord,
    },
};

const MAX_RANDOM_SEED: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub seed: u64,
    pub stills: Vec<PathBuf>,
    pub video_path: PathBuf,
    pub video_frames: usize,
}

pub fn generate(context: &Context, request: &GenerationRequest) -> Result<GenerationOutput> {
    request.validate()?;

    let models = context.models();
    let seed = request.seed.unwrap_or_else(|| rand::thread_rng().gen_range(0..=MAX_RANDOM_SEED));
    models.runtime.seed(seed)?;
    info!("generating \"{}\" with seed {}", request.prompt, seed);

    context.request_log().append(&RequestLogRecord::new(request, seed))?;

    let placement = models.placement();
    if placement.device != request.device || placement.full_precision != request.full_precision {
        warn!(
            "requested {} (full precision: {}) but the model is loaded on {} (full precision: {}), using the loaded placement",
            request.device,
            request.full_precision,
            placement.device,
            placement.full_precision,
        );
    }
    let keep_resident = request.turbo || placement.device == DeviceChoice::Cpu;

    let prepared = prepare_image(&request.image, request.width, request.height)?;
    let init_image = prepared.tensor.repeat((request.batch_size, 1, 1, 1))?;
    let init_latent = models.staged(Stage::FirstStage, keep_resident, |models| models.encoder.encode(&init_image))?;

    let t_enc = request.t_enc();
    info!("target t_enc is {} steps", t_enc);

    let mut sample_directory = SampleDirectory::create(&request.outdir, &request.prompt)?;
    let mut stills = Vec::new();
    let mut frames = Vec::new();

    for iteration in 0..request.n_iter {
        let conditioning = models.staged(Stage::CondStage, keep_resident, |models| {
            build_conditioning(models.conditioner.as_ref(), &request.prompt, request.batch_size, request.scale)
        })?;

        let params = SamplingParams {
            steps: request.ddim_steps,
            t_enc,
            guidance_scale: request.scale,
            eta: request.ddim_eta,
            seed: seed.wrapping_add(iteration as u64),
            unet_batch_size: request.unet_bs,
        };
        let sampled = models.staged(Stage::Unet, keep_resident, |models| {
            models.sampler.sample(&init_latent, &conditioning, &params)
        })?;

        info!("saving images");
        frames = models.staged(Stage::FirstStage, keep_resident, |models| {
            interpolate(models.decoder.as_ref(), &init_latent, &sampled, request.n_interpolate_samples, |frame| {
                stills.push(sample_directory.save(&frame.image, seed, request.img_format)?);
                Ok(())
            })
        })?;
    }

    let video = video_sequence(frames);
    context.video_encoder().encode(&video, context.fps(), context.video_path())?;
    info!(
        "saved {} stills to {} and a {} frame video to {}",
        stills.len(),
        sample_directory.path().display(),
        video.len(),
        context.video_path().display(),
    );

    Ok(GenerationOutput {
        seed,
        stills,
        video_path: context.video_path().to_owned(),
        video_frames: video.len(),
    })
}
