use crate::{
    backend::Backend,
    error::{Error, Result},
    tensor::Tensor,
};
use rand::{seq::SliceRandom, Rng};

/// One mini-batch: inputs shaped `[n, ..sample_shape]` and one class index
/// per sample.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub inputs: Tensor<B>,
    pub targets: Vec<usize>,
}

impl<B: Backend> Batch<B> {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// A finite, restartable source of batches. Every call to [`batches`]
/// starts again from the first batch.
///
/// [`batches`]: DataLoader::batches
pub trait DataLoader<B: Backend> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch<B>>> + '_>;
    fn num_batches(&self) -> usize;
    fn num_samples(&self) -> usize;
}

/// Host-resident samples cut into fixed-size batches. The last batch keeps
/// the remainder, so it may be smaller.
pub struct InMemoryLoader<B: Backend> {
    images: Vec<f32>,
    labels: Vec<usize>,
    sample_shape: Vec<usize>,
    batch_size: usize,
    order: Vec<usize>,
    backend: B,
}

impl<B: Backend> InMemoryLoader<B> {
    pub fn new(
        backend: B,
        images: Vec<f32>,
        labels: Vec<usize>,
        sample_shape: &[usize],
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be at least 1".into()));
        }
        let sample_len: usize = sample_shape.iter().product();
        if sample_shape.is_empty() || sample_len == 0 {
            return Err(Error::InvalidConfig(format!("sample shape {sample_shape:?} is empty")));
        }
        if images.len() != labels.len() * sample_len {
            return Err(Error::InvalidConfig(format!(
                "{} values do not split into {} samples of shape {sample_shape:?}",
                images.len(),
                labels.len()
            )));
        }

        let order = (0..labels.len()).collect();
        Ok(Self {
            images,
            labels,
            sample_shape: sample_shape.to_vec(),
            batch_size,
            order,
            backend,
        })
    }

    /// Permutes the sample order used by the following epochs.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sample_shape(&self) -> &[usize] {
        &self.sample_shape
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    fn gather(&self, indices: &[usize]) -> Result<Batch<B>> {
        let sample_len: usize = self.sample_shape.iter().product();
        let mut data = Vec::with_capacity(indices.len() * sample_len);
        let mut targets = Vec::with_capacity(indices.len());
        for &i in indices {
            data.extend_from_slice(&self.images[i * sample_len..(i + 1) * sample_len]);
            targets.push(self.labels[i]);
        }

        let mut shape = Vec::with_capacity(self.sample_shape.len() + 1);
        shape.push(indices.len());
        shape.extend_from_slice(&self.sample_shape);
        Ok(Batch {
            inputs: Tensor::from_host(&self.backend, &data, &shape)?,
            targets,
        })
    }
}

impl<B: Backend> DataLoader<B> for InMemoryLoader<B> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch<B>>> + '_> {
        Box::new(self.order.chunks(self.batch_size).map(move |indices| self.gather(indices)))
    }

    fn num_batches(&self) -> usize {
        self.labels.len().div_ceil(self.batch_size)
    }

    fn num_samples(&self) -> usize {
        self.labels.len()
    }
}
