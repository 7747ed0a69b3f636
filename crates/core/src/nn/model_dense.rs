use crate::{
    backend::Backend,
    error::{Error, Result},
    nn::{Classifier, Flatten, Init, Layer, Linear, ReLU, Sequential},
};
use rand::RngCore;
use tracing::trace;

/// Fully-connected classifier: flatten -> 128 -> ReLU -> 64 -> ReLU -> classes.
pub struct DenseClassifier<B: Backend> {
    stack: Sequential<B>,
    input_shape: (usize, usize),
    num_classes: usize,
    backend: B,
}

impl<B: Backend + Clone> DenseClassifier<B> {
    pub const HIDDEN: [usize; 2] = [128, 64];

    /// Builds the stack, then re-initializes every linear layer with Xavier
    /// uniform weights and zero biases.
    pub fn new(backend: B, input_shape: (usize, usize), num_classes: usize, rng: &mut dyn RngCore) -> Result<Self> {
        let (height, width) = input_shape;
        if height == 0 || width == 0 {
            return Err(Error::InvalidConfig(format!("input shape {input_shape:?} has an empty axis")));
        }
        if num_classes == 0 {
            return Err(Error::InvalidConfig("num_classes must be at least 1".into()));
        }

        let [h1, h2] = Self::HIDDEN;
        let layers: Vec<Box<dyn Layer<B>>> = vec![
            Box::new(Flatten::new()),
            Box::new(Linear::new(backend.clone(), height * width, h1, rng)),
            Box::new(ReLU::new(backend.clone())),
            Box::new(Linear::new(backend.clone(), h1, h2, rng)),
            Box::new(ReLU::new(backend.clone())),
            Box::new(Linear::new(backend.clone(), h2, num_classes, rng)),
        ];
        let mut stack = Sequential::new(layers);
        stack.init_params(Init::XavierUniform, rng);
        trace!(height, width, num_classes, "built dense classifier");

        Ok(Self {
            stack,
            input_shape,
            num_classes,
            backend,
        })
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }
}

impl<B: Backend> Classifier<B> for DenseClassifier<B> {
    fn backend(&self) -> &B {
        &self.backend
    }

    fn stack(&self) -> &Sequential<B> {
        &self.stack
    }

    fn stack_mut(&mut self) -> &mut Sequential<B> {
        &mut self.stack
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
