//! Deterministic stand-ins for the model capabilities and the video encoder.

use {
    std::{fs, io::Cursor, path::{Path, PathBuf}, sync::{Arc, Mutex}},
    candle::{DType, Device, Tensor},
    image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage},
    crate::{
        error::{Error, Result},
        models::{
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
        request::DeviceChoice,
        video::VideoEncoder,
    },
};

pub struct FakeEncoder;

impl ImageEncoder for FakeEncoder {
    fn encode(&self, image: &Tensor) -> Result<Tensor> {
        Ok(image.mean_keepdim(1)?.avg_pool2d(8)?.repeat((1, 4, 1, 1))?)
    }
}

#[derive(Default)]
pub struct FakeConditioner {
    prompts: Mutex<Vec<String>>,
}

impl FakeConditioner {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl TextConditioner for FakeConditioner {
    fn condition(&self, prompt: &str) -> Result<Tensor> {
        self.prompts.lock().unwrap().push(prompt.to_owned());

        let value = prompt.bytes().map(|b| b as u32).sum::<u32>() % 97;
        Ok(Tensor::full(value as f32 / 97.0, (1, 2, 4), &Device::Cpu)?)
    }
}

#[derive(Default)]
pub struct FakeSampler {
    calls: Mutex<Vec<SamplingParams>>,
}

impl FakeSampler {
    pub fn calls(&self) -> Vec<SamplingParams> {
        self.calls.lock().unwrap().clone()
    }
}

impl LatentSampler for FakeSampler {
    fn sample(&self, init_latent: &Tensor, conditioning: &Conditioning, params: &SamplingParams) -> Result<Tensor> {
        self.calls.lock().unwrap().push(params.clone());

        let strength = params.t_enc as f64 / params.steps as f64;
        let noise = seeded_randn(init_latent.dims(), params.seed, init_latent.device())?;
        let latent = (init_latent + (noise * strength)?)?;
        Ok(latent.broadcast_add(&conditioning.cond.mean_all()?)?)
    }
}

pub struct FakeDecoder;

impl LatentDecoder for FakeDecoder {
    fn decode(&self, latent: &Tensor) -> Result<Tensor> {
        let (_, _, height, width) = latent.dims4()?;
        Ok(latent.narrow(1, 0, 3)?.upsample_nearest2d(height * 8, width * 8)?.tanh()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Seed(u64),
    Load(Stage),
    Release(Stage),
}

pub struct FakeRuntime {
    device: DeviceChoice,
    events: Mutex<Vec<RuntimeEvent>>,
}

impl FakeRuntime {
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Runtime for FakeRuntime {
    fn placement(&self) -> Placement {
        Placement {
            device: self.device,
            full_precision: false,
        }
    }

    fn seed(&self, seed: u64) -> Result<()> {
        self.events.lock().unwrap().push(RuntimeEvent::Seed(seed));
        Ok(())
    }

    fn load(&self, stage: Stage) -> Result<()> {
        self.events.lock().unwrap().push(RuntimeEvent::Load(stage));
        Ok(())
    }

    fn release(&self, stage: Stage) -> Result<()> {
        self.events.lock().unwrap().push(RuntimeEvent::Release(stage));
        Ok(())
    }
}

pub struct Fakes {
    pub conditioner: Arc<FakeConditioner>,
    pub sampler: Arc<FakeSampler>,
    pub runtime: Arc<FakeRuntime>,
}

pub fn fakes(device: DeviceChoice) -> (ModelSession, Fakes) {
    let conditioner = Arc::new(FakeConditioner::default());
    let sampler = Arc::new(FakeSampler::default());
    let runtime = Arc::new(FakeRuntime {
        device,
        events: Mutex::new(Vec::new()),
    });

    let session = ModelSession {
        encoder: Arc::new(FakeEncoder),
        conditioner: conditioner.clone(),
        sampler: sampler.clone(),
        decoder: Arc::new(FakeDecoder),
        runtime: runtime.clone(),
    };

    (session, Fakes { conditioner, sampler, runtime })
}

pub fn fake_session(device: DeviceChoice) -> (ModelSession, Arc<FakeRuntime>) {
    let (session, fakes) = fakes(device);
    (session, fakes.runtime)
}

#[derive(Debug, Clone)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub fps: u32,
    pub frames: Vec<RgbImage>,
}

/// Records the frames it is given and writes a small placeholder file in place of a video.
#[derive(Default)]
pub struct RecordingVideoEncoder {
    videos: Mutex<Vec<EncodedVideo>>,
}

impl RecordingVideoEncoder {
    pub fn videos(&self) -> Vec<EncodedVideo> {
        self.videos.lock().unwrap().clone()
    }
}

impl VideoEncoder for RecordingVideoEncoder {
    fn encode(&self, frames: &[RgbImage], fps: u32, output: &Path) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::Video("no frames to encode".to_owned()));
        }

        fs::write(output, format!("frames={} fps={}", frames.len(), fps))?;
        self.videos.lock().unwrap().push(EncodedVideo {
            path: output.to_owned(),
            fps,
            frames: frames.to_vec(),
        });
        Ok(())
    }
}

/// A PNG-encoded gradient of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]));

    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut bytes, ImageOutputFormat::Png).unwrap();
    bytes.into_inner()
}

pub fn tensor_values(tensor: &Tensor) -> Vec<f32> {
    tensor.to_dtype(DType::F32).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap()
}
