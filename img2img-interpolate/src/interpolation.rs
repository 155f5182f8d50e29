//! Interpolation between the initial latent and the sampled one.
//!
//! Frames are produced for `t = 0, 1/N, …, (N-1)/N`. The sampled latent itself (`t = 1`) is never
//! rendered.

use {
    candle::{DType, Device, Tensor},
    image::RgbImage,
    tracing::debug,
    crate::{
        error::{Error, Result},
        models::LatentDecoder,
    },
};

#[derive(Debug, Clone)]
pub struct Frame {
    pub t: f64,
    /// Batch element the frame was decoded from.
    pub element: usize,
    pub image: RgbImage,
}

pub fn interpolation_parameters(samples: usize) -> Vec<f64> {
    (0..samples).map(|i| i as f64 / samples as f64).collect()
}

/// `initial + t · (target − initial)`, exactly `initial` at `t = 0`.
pub fn lerp(initial: &Tensor, target: &Tensor, t: f64) -> Result<Tensor> {
    if t == 0.0 {
        return Ok(initial.clone());
    }

    let delta = (target - initial)?;
    Ok((initial + (delta * t)?)?)
}

/// Converts one decoded `3×H×W` (or `1×3×H×W`) image in `[-1, 1]` to 8-bit RGB.
pub fn decoded_to_image(decoded: &Tensor) -> Result<RgbImage> {
    let decoded = match decoded.rank() {
        4 => decoded.squeeze(0)?,
        _ => decoded.clone(),
    };

    let (channels, height, width) = decoded.dims3()?;
    if channels != 3 {
        return Err(Error::Decode(format!("decoded image has {} channels, expected 3", channels)));
    }

    let pixels = ((decoded.to_device(&Device::Cpu)?.to_dtype(DType::F32)? + 1.0)? / 2.0)?
        .clamp(0f32, 1f32)?;
    let pixels = (pixels * 255.0)?
        .to_dtype(DType::U8)?
        .permute((1, 2, 0))?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<u8>()?;

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| Error::Decode(format!("could not build a {}x{} frame", width, height)))
}

/// Decodes `samples` interpolated latents per batch element, `t` ascending (outer) and batch
/// element ascending (inner). `on_frame` sees every frame as soon as it is decoded.
pub fn interpolate(
    decoder: &dyn LatentDecoder,
    initial: &Tensor,
    target: &Tensor,
    samples: usize,
    mut on_frame: impl FnMut(&Frame) -> Result<()>,
) -> Result<Vec<Frame>> {
    let batch_size = target.dim(0)?;
    let mut frames = Vec::with_capacity(samples * batch_size);

    for t in interpolation_parameters(samples) {
        for element in 0..batch_size {
            let latent = lerp(&initial.narrow(0, element, 1)?, &target.narrow(0, element, 1)?, t)?;
            let image = decoded_to_image(&decoder.decode(&latent)?)?;
            debug!(t, element, "decoded interpolated frame");

            let frame = Frame {
                t,
                element,
                image,
            };
            on_frame(&frame)?;
            frames.push(frame);
        }
    }

    Ok(frames)
}

/// Frames of the last batch element, in `t` order. Only this sequence is turned into video.
pub fn video_sequence(frames: Vec<Frame>) -> Vec<RgbImage> {
    let Some(last_element) = frames.iter().map(|frame| frame.element).max() else {
        return Vec::new();
    };

    frames.into_iter()
        .filter(|frame| frame.element == last_element)
        .map(|frame| frame.image)
        .collect()
}
