use {
    std::{fs, path::{Path, PathBuf}},
    image::RgbImage,
    crate::{error::Result, request::ImageFormat},
};

const MAX_DIRECTORY_NAME: usize = 150;

/// Directory-safe name for a prompt: words split on `:` and spaces are joined with `_`.
pub fn sanitize_prompt(prompt: &str) -> String {
    let name: String = prompt.split(|c| c == ':' || c == ' ')
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .take(MAX_DIRECTORY_NAME)
        .collect();

    if !name.is_empty() && name.chars().all(|c| c == '.') {
        "_".repeat(name.len())
    } else {
        name
    }
}

/// Per-prompt output directory with the running still counter.
pub struct SampleDirectory {
    path: PathBuf,
    counter: usize,
}

impl SampleDirectory {
    /// Creates `<outdir>/<sanitized prompt>`. Numbering continues after the entries already there.
    pub fn create(outdir: &Path, prompt: &str) -> Result<Self> {
        let path = outdir.join(sanitize_prompt(prompt));
        fs::create_dir_all(&path)?;
        let counter = fs::read_dir(&path)?.count();

        Ok(Self {
            path,
            counter,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_file_name(&self, seed: u64, format: ImageFormat) -> String {
        still_file_name(seed, self.counter, format)
    }

    pub fn save(&mut self, image: &RgbImage, seed: u64, format: ImageFormat) -> Result<PathBuf> {
        let path = self.path.join(self.next_file_name(seed, format));
        image.save(&path)?;
        self.counter += 1;
        Ok(path)
    }
}

pub fn still_file_name(seed: u64, counter: usize, format: ImageFormat) -> String {
    format!("seed_{}_{:05}.{}", seed, counter, format.extension())
}
