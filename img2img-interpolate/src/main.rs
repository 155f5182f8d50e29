use {
    std::path::PathBuf,
    clap::Parser,
    tracing::info,
    img2img_common::utils::{init_logging, load_config},
    img2img_interpolate::{
        context::Context,
        models::stable_diffusion,
        request_log::RequestLog,
        server::run_server,
        settings::Settings,
        video::FfmpegVideoEncoder,
    },
};

#[derive(Parser, Debug)]
#[command(about = "img2img interpolation server")]
struct Args {
    /// Config file with server, model and output settings.
    #[arg(long = "config_path", default_value = "config.toml")]
    config_path: String,

    /// Directory holding the tokenizer and the model weights.
    #[arg(long = "ckpt_path", default_value = "models/ldm/stable-diffusion-v1")]
    ckpt_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();
    let config = load_config(&args.config_path)?;
    let settings = Settings::from_config(&config)?;

    let models = {
        let ckpt_path = args.ckpt_path.clone();
        let model_settings = settings.model.clone();
        tokio::task::spawn_blocking(move || stable_diffusion::load(&ckpt_path, &model_settings)).await??
    };
    info!("model session ready");

    let context = Context::new(
        models,
        Box::new(FfmpegVideoEncoder::new(settings.video.ffmpeg.clone())),
        RequestLog::new(settings.output.request_log.clone()),
        settings.output.video_path.clone(),
        settings.output.fps,
    );

    run_server(&settings.server, context).await?;
    Ok(())
}
