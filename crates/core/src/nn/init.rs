use rand::Rng;

/// Weight initialization policy applied to parameterized layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Weights `U(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`, biases zero.
    XavierUniform,
    /// Weights and biases `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`; what a layer
    /// gets when nothing re-initializes it.
    FanInUniform,
}

pub fn xavier_uniform<R: Rng + ?Sized>(rng: &mut R, fan_in: usize, fan_out: usize, len: usize) -> Vec<f32> {
    let a = (6.0 / (fan_in + fan_out) as f32).sqrt();
    uniform(rng, a, len)
}

pub fn fan_in_uniform<R: Rng + ?Sized>(rng: &mut R, fan_in: usize, len: usize) -> Vec<f32> {
    let bound = 1.0 / (fan_in as f32).sqrt();
    uniform(rng, bound, len)
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, bound: f32, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-bound..=bound)).collect()
}
