use {
    candle::{DType, Device, Tensor},
    image::imageops::{self, FilterType},
    tracing::info,
    crate::error::{Error, Result},
};

/// Side length every dimension is floored to; the autoencoder downsamples by this factor.
pub const DIMENSION_MULTIPLE: u32 = 64;

pub struct PreparedImage {
    /// `1×3×H×W`, values in `[-1, 1]`.
    pub tensor: Tensor,
    pub width: u32,
    pub height: u32,
}

/// Final `(width, height)` for an image of size `native`. Requested dimensions replace native ones,
/// then both are floored to a multiple of [`DIMENSION_MULTIPLE`].
pub fn target_size(native: (u32, u32), width: Option<u32>, height: Option<u32>) -> Result<(u32, u32)> {
    let width = width.unwrap_or(native.0);
    let height = height.unwrap_or(native.1);

    let floored = (width - width % DIMENSION_MULTIPLE, height - height % DIMENSION_MULTIPLE);
    if floored.0 == 0 || floored.1 == 0 {
        return Err(Error::ImageTooSmall { width, height });
    }

    Ok(floored)
}

pub fn prepare_image(bytes: &[u8], width: Option<u32>, height: Option<u32>) -> Result<PreparedImage> {
    let image = image::load_from_memory(bytes).map_err(Error::ImageDecode)?.to_rgb8();
    info!("loaded input image of size ({}, {})", image.width(), image.height());

    let (width, height) = target_size(image.dimensions(), width, height)?;
    info!("new image size ({}, {})", width, height);

    let resized = imageops::resize(&image, width, height, FilterType::Lanczos3);

    let tensor = Tensor::from_vec(resized.into_raw(), (height as usize, width as usize, 3), &Device::Cpu)?
        .to_dtype(DType::F32)?
        .permute((2, 0, 1))?
        .affine(2.0 / 255.0, -1.0)?
        .unsqueeze(0)?;

    Ok(PreparedImage {
        tensor,
        width,
        height,
    })
}
