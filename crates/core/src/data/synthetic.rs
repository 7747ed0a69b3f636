use crate::{
    backend::Backend,
    data::InMemoryLoader,
    error::{Error, Result},
};
use rand::Rng;

/// Class-separable noise around one random prototype per class.
///
/// Draw the train and test sets from the same `ClassBlobs` so they share
/// prototypes.
#[derive(Debug, Clone)]
pub struct ClassBlobs {
    prototypes: Vec<Vec<f32>>,
    sample_shape: Vec<usize>,
    noise: f32,
}

impl ClassBlobs {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, num_classes: usize, sample_shape: &[usize], noise: f32) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::InvalidConfig("num_classes must be at least 1".into()));
        }
        let sample_len: usize = sample_shape.iter().product();
        if sample_shape.is_empty() || sample_len == 0 {
            return Err(Error::InvalidConfig(format!("sample shape {sample_shape:?} is empty")));
        }
        if !(noise.is_finite() && noise >= 0.0) {
            return Err(Error::InvalidConfig(format!("noise {noise} must be non-negative")));
        }

        let prototypes = (0..num_classes)
            .map(|_| (0..sample_len).map(|_| rng.gen_range(0.0..1.0)).collect())
            .collect();
        Ok(Self {
            prototypes,
            sample_shape: sample_shape.to_vec(),
            noise,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.prototypes.len()
    }

    /// `num_samples` samples with labels cycling through every class.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, num_samples: usize) -> (Vec<f32>, Vec<usize>) {
        let sample_len: usize = self.sample_shape.iter().product();
        let mut images = Vec::with_capacity(num_samples * sample_len);
        let mut labels = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let label = i % self.prototypes.len();
            let jitter = self.noise;
            images.extend(
                self.prototypes[label]
                    .iter()
                    .map(|&p| if jitter > 0.0 { p + rng.gen_range(-jitter..jitter) } else { p }),
            );
            labels.push(label);
        }
        (images, labels)
    }

    pub fn loader<B: Backend, R: Rng + ?Sized>(
        &self,
        backend: B,
        rng: &mut R,
        num_samples: usize,
        batch_size: usize,
    ) -> Result<InMemoryLoader<B>> {
        let (images, labels) = self.sample(rng, num_samples);
        let mut loader = InMemoryLoader::new(backend, images, labels, &self.sample_shape, batch_size)?;
        loader.shuffle(rng);
        Ok(loader)
    }
}
