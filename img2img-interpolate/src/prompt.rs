//! Prompt parsing and text conditioning.
//!
//! A prompt may hold several sub-prompts, each terminated by `:` and followed by a weight up to
//! the next space, e.g. `"a castle:2 a storm:0.5 at night"`. Text left after the last weight is a
//! final sub-prompt with weight 1.

use {
    candle::Tensor,
    tracing::warn,
    crate::{
        error::Result,
        models::{Conditioning, TextConditioner},
    },
};

const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPrompt {
    pub text: String,
    pub weight: f64,
}

pub fn split_weighted_subprompts(text: &str) -> Vec<WeightedPrompt> {
    let mut prompts = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some((prompt, rest)) = remaining.split_once(':') else {
            prompts.push(WeightedPrompt {
                text: remaining.to_owned(),
                weight: DEFAULT_WEIGHT,
            });
            break;
        };

        let (weight, rest) = rest.split_once(' ').unwrap_or((rest, ""));
        prompts.push(WeightedPrompt {
            text: prompt.to_owned(),
            weight: parse_weight(weight),
        });
        remaining = rest;
    }

    prompts
}

fn parse_weight(text: &str) -> f64 {
    if text.is_empty() {
        return DEFAULT_WEIGHT;
    }

    match text.parse::<f64>() {
        Ok(weight) => weight,
        Err(_) => {
            warn!("'{}' is not a value, are you missing a space?", text);
            DEFAULT_WEIGHT
        }
    }
}

/// Scales weights to sum to 1. Weights that do not sum to a positive finite number are replaced
/// by uniform weights.
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();

    if total > 0.0 && total.is_finite() {
        weights.iter().map(|weight| weight / total).collect()
    } else {
        warn!(total, "sub-prompt weights do not have a positive sum, using uniform weights");
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

/// Builds the batch conditioning for `prompt`, plus the unconditional conditioning when guidance
/// is requested (`guidance_scale != 1`).
pub fn build_conditioning(
    conditioner: &dyn TextConditioner,
    prompt: &str,
    batch_size: usize,
    guidance_scale: f64,
) -> Result<Conditioning> {
    let uncond = if guidance_scale != 1.0 {
        Some(broadcast_to_batch(&conditioner.condition("")?, batch_size)?)
    } else {
        None
    };

    let subprompts = split_weighted_subprompts(prompt);
    let cond = match subprompts.as_slice() {
        [] => conditioner.condition("")?,
        [single] => conditioner.condition(&single.text)?,
        several => {
            let weights = normalize_weights(&several.iter().map(|p| p.weight).collect::<Vec<_>>());

            let parts = several.iter()
                .zip(weights)
                .map(|(subprompt, weight)| -> Result<Tensor> { Ok((conditioner.condition(&subprompt.text)? * weight)?) })
                .collect::<Result<Vec<_>>>()?;

            Tensor::stack(&parts, 0)?.sum(0)?
        }
    };

    Ok(Conditioning {
        cond: broadcast_to_batch(&cond, batch_size)?,
        uncond,
    })
}

fn broadcast_to_batch(conditioning: &Tensor, batch_size: usize) -> Result<Tensor> {
    Ok(conditioning.repeat((batch_size, 1, 1))?)
}
