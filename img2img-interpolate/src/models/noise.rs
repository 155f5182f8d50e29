use {
    candle::{Device, Result, Tensor},
    rand::{rngs::StdRng, Rng, SeedableRng},
    rand_distr::StandardNormal,
};

/// Standard normal noise drawn from a seeded generator, identical across devices and runs.
pub fn seeded_randn(shape: &[usize], seed: u64, device: &Device) -> Result<Tensor> {
    let rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = rng.sample_iter(StandardNormal)
        .take(shape.iter().product())
        .collect();

    Tensor::from_vec(data, shape, device)
}
