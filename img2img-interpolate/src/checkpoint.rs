use {
    std::path::{Path, PathBuf},
    tracing::info,
    crate::{
        error::{Error, Result},
        settings::ModelSettings,
    },
};

const FIRST_GROUP: [&str; 3] = ["time_embed", "input_blocks", "middle_block"];
const FIRST_GROUP_DIFFUSERS: [&str; 4] = ["time_embedding", "conv_in", "down_blocks", "mid_block"];

/// Files that make up a checkpoint, resolved against the checkpoint directory.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub tokenizer: PathBuf,
    pub clip: PathBuf,
    pub vae: PathBuf,
    pub unet: PathBuf,
}

impl ModelFiles {
    pub fn resolve(ckpt_dir: &Path, settings: &ModelSettings) -> Result<Self> {
        let resolve = |file: &Path| {
            let path = ckpt_dir.join(file);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::Checkpoint(format!("missing checkpoint file: {}", path.display())))
            }
        };

        Ok(Self {
            tokenizer: resolve(&settings.tokenizer)?,
            clip: resolve(&settings.clip_weights)?,
            vae: resolve(&settings.vae_weights)?,
            unet: resolve(&settings.unet_weights)?,
        })
    }
}

/// UNet weight names split into the two halves that are loaded separately.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeyPartition {
    pub model1: Vec<String>,
    pub model2: Vec<String>,
    /// Keys outside the diffusion model, kept as they are.
    pub other: Vec<String>,
}

pub fn split_unet_keys<I, S>(keys: I) -> KeyPartition
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut partition = KeyPartition::default();

    for key in keys {
        let key = key.as_ref();

        if let Some(rest) = key.strip_prefix("model.") {
            if rest.split('.').any(|segment| FIRST_GROUP.contains(&segment)) {
                partition.model1.push(format!("model1.{}", rest));
            } else {
                partition.model2.push(format!("model2.{}", rest));
            }
            continue;
        }

        match key.split('.').next() {
            Some(head) if FIRST_GROUP_DIFFUSERS.contains(&head) => partition.model1.push(format!("model1.{}", key)),
            Some("up_blocks" | "conv_norm_out" | "conv_out") => partition.model2.push(format!("model2.{}", key)),
            _ => partition.other.push(key.to_owned()),
        }
    }

    partition
}

/// Reads the UNet tensor names and checks that they split into a usable first group.
pub fn inventory(unet_path: &Path) -> Result<KeyPartition> {
    // the file is only read, never mutated while mapped
    let tensors = unsafe { candle::safetensors::MmapedSafetensors::new(unet_path)? };
    let partition = split_unet_keys(tensors.tensors().into_iter().map(|(name, _)| name));

    info!(
        "unet checkpoint {}: {} keys in model1, {} in model2, {} kept",
        unet_path.display(),
        partition.model1.len(),
        partition.model2.len(),
        partition.other.len(),
    );

    if partition.model1.is_empty() {
        return Err(Error::Checkpoint(format!("no diffusion model weights found in {}", unet_path.display())));
    }

    Ok(partition)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::fs,
        tempfile::tempdir,
        crate::settings::ModelVersion,
    };

    fn model_settings() -> ModelSettings {
        ModelSettings {
            version: ModelVersion::V1_5,
            tokenizer: "tokenizer.json".into(),
            clip_weights: "clip.safetensors".into(),
            vae_weights: "vae.safetensors".into(),
            unet_weights: "unet.safetensors".into(),
            device: None,
            full_precision: false,
            sliced_attention_size: None,
            use_flash_attn: false,
        }
    }

    #[test]
    fn splits_single_file_checkpoint_keys() {
        let partition = split_unet_keys([
            "model.diffusion_model.time_embed.0.weight",
            "model.diffusion_model.input_blocks.1.0.in_layers.2.weight",
            "model.diffusion_model.middle_block.0.emb_layers.1.bias",
            "model.diffusion_model.output_blocks.0.0.skip_connection.weight",
            "model.diffusion_model.out.2.bias",
            "first_stage_model.decoder.conv_in.weight",
            "cond_stage_model.transformer.text_model.embeddings.position_ids",
        ]);

        assert_eq!(partition.model1, vec![
            "model1.diffusion_model.time_embed.0.weight",
            "model1.diffusion_model.input_blocks.1.0.in_layers.2.weight",
            "model1.diffusion_model.middle_block.0.emb_layers.1.bias",
        ]);
        assert_eq!(partition.model2, vec![
            "model2.diffusion_model.output_blocks.0.0.skip_connection.weight",
            "model2.diffusion_model.out.2.bias",
        ]);
        assert_eq!(partition.other.len(), 2);
    }

    #[test]
    fn splits_diffusers_keys() {
        let partition = split_unet_keys([
            "conv_in.weight",
            "time_embedding.linear_1.bias",
            "down_blocks.0.resnets.0.conv1.weight",
            "mid_block.attentions.0.proj_in.weight",
            "up_blocks.3.resnets.2.conv2.weight",
            "conv_out.bias",
        ]);

        assert_eq!(partition.model1.len(), 4);
        assert_eq!(partition.model2, vec!["model2.up_blocks.3.resnets.2.conv2.weight", "model2.conv_out.bias"]);
        assert!(partition.other.is_empty());
    }

    #[test]
    fn resolves_existing_files() {
        let dir = tempdir().unwrap();
        for file in ["tokenizer.json", "clip.safetensors", "vae.safetensors", "unet.safetensors"] {
            fs::write(dir.path().join(file), b"").unwrap();
        }

        let files = ModelFiles::resolve(dir.path(), &model_settings()).unwrap();

        assert_eq!(files.unet, dir.path().join("unet.safetensors"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tokenizer.json"), b"").unwrap();

        let err = ModelFiles::resolve(dir.path(), &model_settings()).unwrap_err();

        assert!(err.to_string().contains("clip.safetensors"));
    }
}
