use {
    std::{collections::HashMap, fmt, path::PathBuf, str::FromStr},
    serde::Serialize,
    crate::error::{Error, Result},
};

pub const DEFAULT_OUTDIR: &str = "outputs/img2img-samples";

/// Upper bound for both the iteration count and the batch size.
pub const MAX_REPEATS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    Cuda,
    Cpu,
}

impl FromStr for DeviceChoice {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "cuda" => Ok(Self::Cuda),
            "cpu" => Ok(Self::Cpu),
            other => Err(invalid("device", format!("expected \"cuda\" or \"cpu\", got \"{}\"", other))),
        }
    }
}

impl fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cuda => "cuda",
            Self::Cpu => "cpu",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            other => Err(invalid("img_format", format!("expected \"png\" or \"jpg\", got \"{}\"", other))),
        }
    }
}

/// Every user-facing parameter of a single generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image: Vec<u8>,
    pub prompt: String,
    pub strength: f64,
    pub ddim_steps: usize,
    pub n_iter: usize,
    pub batch_size: usize,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub scale: f64,
    pub ddim_eta: f64,
    pub unet_bs: usize,
    pub device: DeviceChoice,
    pub seed: Option<u64>,
    pub outdir: PathBuf,
    pub img_format: ImageFormat,
    pub turbo: bool,
    pub full_precision: bool,
    pub n_interpolate_samples: usize,
}

impl GenerationRequest {
    /// A request with the form defaults for the given image and prompt.
    pub fn new(image: Vec<u8>, prompt: impl Into<String>) -> Self {
        Self {
            image,
            prompt: prompt.into(),
            strength: 0.75,
            ddim_steps: 50,
            n_iter: 1,
            batch_size: 1,
            height: Some(512),
            width: Some(512),
            scale: 7.5,
            ddim_eta: 0.0,
            unet_bs: 1,
            device: DeviceChoice::Cuda,
            seed: None,
            outdir: PathBuf::from(DEFAULT_OUTDIR),
            img_format: ImageFormat::Png,
            turbo: true,
            full_precision: false,
            n_interpolate_samples: 30,
        }
    }

    /// Builds a request from submitted form fields. Absent fields take the form defaults,
    /// absent checkboxes are unchecked.
    pub fn from_form(image: Vec<u8>, fields: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::new(Vec::new(), "");
        let field = |name: &str| fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        Ok(Self {
            image,
            prompt: fields.get("prompt").cloned().unwrap_or_default(),
            strength: parse_or(field("strength"), "strength", defaults.strength)?,
            ddim_steps: parse_or(field("ddim_steps"), "ddim_steps", defaults.ddim_steps)?,
            n_iter: parse_or(field("n_iter"), "n_iter", defaults.n_iter)?,
            batch_size: parse_or(field("batch_size"), "batch_size", defaults.batch_size)?,
            height: field("height").map(|v| parse(v, "height")).transpose()?,
            width: field("width").map(|v| parse(v, "width")).transpose()?,
            scale: parse_or(field("scale"), "scale", defaults.scale)?,
            ddim_eta: parse_or(field("ddim_eta"), "ddim_eta", defaults.ddim_eta)?,
            unet_bs: parse_or(field("unet_bs"), "unet_bs", defaults.unet_bs)?,
            device: field("device").map(DeviceChoice::from_str).transpose()?.unwrap_or(defaults.device),
            seed: field("seed").map(|v| parse(v, "seed")).transpose()?,
            outdir: field("outdir").map(PathBuf::from).unwrap_or(defaults.outdir),
            img_format: field("img_format").map(ImageFormat::from_str).transpose()?.unwrap_or(defaults.img_format),
            turbo: field("turbo").map(is_checked).unwrap_or(false),
            full_precision: field("full_precision").map(is_checked).unwrap_or(false),
            n_interpolate_samples: parse_or(field("n_interpolate_samples"), "n_interpolate_samples", defaults.n_interpolate_samples)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(Error::InvalidStrength(self.strength));
        }

        check_range("ddim_steps", self.ddim_steps, 1, 1000)?;
        check_range("n_iter", self.n_iter, 1, MAX_REPEATS)?;
        check_range("batch_size", self.batch_size, 1, MAX_REPEATS)?;
        check_range("unet_bs", self.unet_bs, 1, 2)?;
        check_range("n_interpolate_samples", self.n_interpolate_samples, 1, 120)?;

        if let Some(height) = self.height {
            check_range("height", height, 64, 4096)?;
        }
        if let Some(width) = self.width {
            check_range("width", width, 64, 4096)?;
        }

        if !(0.0..=50.0).contains(&self.scale) {
            return Err(invalid("scale", format!("{} is outside of [0, 50]", self.scale)));
        }
        if !(0.0..=1.0).contains(&self.ddim_eta) {
            return Err(invalid("ddim_eta", format!("{} is outside of [0, 1]", self.ddim_eta)));
        }

        Ok(())
    }

    /// Number of denoising steps actually run: `floor(strength * ddim_steps)`.
    pub fn t_enc(&self) -> usize {
        (self.strength * self.ddim_steps as f64) as usize
    }
}

fn check_range<T: PartialOrd + fmt::Display>(name: &'static str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        Err(invalid(name, format!("{} is outside of [{}, {}]", value, min, max)))
    } else {
        Ok(())
    }
}

fn parse<T: FromStr>(value: &str, name: &'static str) -> Result<T> {
    value.parse().map_err(|_| invalid(name, format!("\"{}\" is not a valid value", value)))
}

fn parse_or<T: FromStr>(value: Option<&str>, name: &'static str, default: T) -> Result<T> {
    value.map(|v| parse(v, name)).transpose().map(|v| v.unwrap_or(default))
}

fn is_checked(value: &str) -> bool {
    matches!(value, "on" | "true" | "1")
}

fn invalid(name: &'static str, reason: String) -> Error {
    Error::InvalidParameter { name, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn form_defaults_apply_to_missing_fields() {
        let request = GenerationRequest::from_form(vec![1, 2, 3], &fields(&[("prompt", "a red bicycle")])).unwrap();

        assert_eq!(request.prompt, "a red bicycle");
        assert_eq!(request.strength, 0.75);
        assert_eq!(request.ddim_steps, 50);
        assert_eq!(request.height, None);
        assert_eq!(request.seed, None);
        assert_eq!(request.device, DeviceChoice::Cuda);
        assert_eq!(request.img_format, ImageFormat::Png);
        assert!(!request.turbo);
        assert_eq!(request.n_interpolate_samples, 30);
        assert_eq!(request.image, vec![1, 2, 3]);
    }

    #[test]
    fn form_fields_are_parsed() {
        let request = GenerationRequest::from_form(Vec::new(), &fields(&[
            ("prompt", "cat:2 dog"),
            ("strength", "0.5"),
            ("ddim_steps", "20"),
            ("height", "256"),
            ("width", "320"),
            ("device", "cpu"),
            ("seed", " 42 "),
            ("img_format", "jpg"),
            ("turbo", "on"),
            ("n_interpolate_samples", "10"),
        ])).unwrap();

        assert_eq!(request.strength, 0.5);
        assert_eq!(request.ddim_steps, 20);
        assert_eq!(request.height, Some(256));
        assert_eq!(request.width, Some(320));
        assert_eq!(request.device, DeviceChoice::Cpu);
        assert_eq!(request.seed, Some(42));
        assert_eq!(request.img_format, ImageFormat::Jpg);
        assert!(request.turbo);
        assert_eq!(request.n_interpolate_samples, 10);
    }

    #[test]
    fn malformed_seed_is_rejected() {
        let err = GenerationRequest::from_form(Vec::new(), &fields(&[("seed", "abc")])).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "seed", .. }));
    }

    #[test]
    fn strength_outside_unit_interval_fails_validation() {
        for strength in [-0.1, 1.01] {
            let mut request = GenerationRequest::new(Vec::new(), "x");
            request.strength = strength;
            assert!(matches!(request.validate(), Err(Error::InvalidStrength(_))));
        }

        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.strength = 1.0;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn form_ranges_are_validated() {
        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.n_interpolate_samples = 0;
        assert!(matches!(request.validate(), Err(Error::InvalidParameter { name: "n_interpolate_samples", .. })));

        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.unet_bs = 3;
        assert!(matches!(request.validate(), Err(Error::InvalidParameter { name: "unet_bs", .. })));

        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.width = Some(8192);
        assert!(matches!(request.validate(), Err(Error::InvalidParameter { name: "width", .. })));

        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.n_iter = 1_000_000;
        assert!(matches!(request.validate(), Err(Error::InvalidParameter { name: "n_iter", .. })));

        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.batch_size = 101;
        assert!(matches!(request.validate(), Err(Error::InvalidParameter { name: "batch_size", .. })));

        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.n_iter = 100;
        request.batch_size = 100;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn t_enc_is_floored() {
        let mut request = GenerationRequest::new(Vec::new(), "x");
        request.strength = 0.75;
        request.ddim_steps = 15;
        assert_eq!(request.t_enc(), 11);

        request.strength = 0.0;
        assert_eq!(request.t_enc(), 0);
    }
}
