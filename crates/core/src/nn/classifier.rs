use crate::{
    backend::Backend,
    error::Result,
    nn::{Init, Layer, Mode, Param, Pass},
    tensor::Tensor,
};
use rand::RngCore;

/// An ordered, fixed stack of layers plus the mode and gradient-tracking
/// flags every forward pass is run under.
pub struct Sequential<B: Backend> {
    layers: Vec<Box<dyn Layer<B>>>,
    mode: Mode,
    grad_enabled: bool,
}

impl<B: Backend> Sequential<B> {
    pub fn new(layers: Vec<Box<dyn Layer<B>>>) -> Self {
        Self {
            layers,
            mode: Mode::Train,
            grad_enabled: true,
        }
    }

    pub fn forward(&mut self, x: &Tensor<B>) -> Result<Tensor<B>> {
        let pass = Pass {
            mode: self.mode,
            record: self.grad_enabled,
        };
        let mut output = x.clone();
        for layer in &mut self.layers {
            output = layer.forward(&output, pass)?;
        }
        Ok(output)
    }

    pub fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let mut grad = dy.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    pub fn params_mut(&mut self) -> Vec<Param<'_, B>> {
        self.layers.iter_mut().flat_map(|layer| layer.params()).collect()
    }

    pub fn init_params(&mut self, init: Init, rng: &mut dyn RngCore) {
        for layer in &mut self.layers {
            layer.init_params(init, rng);
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn grad_enabled(&self) -> bool {
        self.grad_enabled
    }

    /// Turning tracking off also drops any activations a layer still holds.
    pub fn set_grad_enabled(&mut self, enabled: bool) {
        if !enabled {
            for layer in &mut self.layers {
                layer.clear_cache();
            }
        }
        self.grad_enabled = enabled;
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// A model the training and evaluation loops can drive.
///
/// Implementors only expose their layer stack; forward applies the
/// mode-dependent output contract: raw logits in [`Mode::Train`] (the loss
/// normalizes them), softmax probabilities in [`Mode::Eval`].
pub trait Classifier<B: Backend> {
    fn backend(&self) -> &B;
    fn stack(&self) -> &Sequential<B>;
    fn stack_mut(&mut self) -> &mut Sequential<B>;
    fn num_classes(&self) -> usize;

    fn forward(&mut self, x: &Tensor<B>) -> Result<Tensor<B>> {
        let logits = self.stack_mut().forward(x)?;
        match self.mode() {
            Mode::Train => Ok(logits),
            Mode::Eval => softmax(self.backend(), &logits),
        }
    }

    /// Backpropagates `d loss / d logits` through the stack, accumulating
    /// into every parameter's gradient.
    fn backward(&mut self, grad: &Tensor<B>) -> Result<Tensor<B>> {
        self.stack_mut().backward(grad)
    }

    fn params_mut(&mut self) -> Vec<Param<'_, B>> {
        self.stack_mut().params_mut()
    }

    fn num_params(&mut self) -> usize {
        self.params_mut().iter().map(|p| p.value.len()).sum()
    }

    fn mode(&self) -> Mode {
        self.stack().mode()
    }

    fn set_mode(&mut self, mode: Mode) {
        self.stack_mut().set_mode(mode);
    }

    fn train(&mut self) {
        self.set_mode(Mode::Train);
    }

    fn eval(&mut self) {
        self.set_mode(Mode::Eval);
    }

    fn grad_enabled(&self) -> bool {
        self.stack().grad_enabled()
    }

    fn set_grad_enabled(&mut self, enabled: bool) {
        self.stack_mut().set_grad_enabled(enabled);
    }
}

/// Runs `f` with gradient tracking disabled, restoring the previous setting
/// afterwards (also when `f` returns an error).
pub fn no_grad<B, M, R, F>(model: &mut M, f: F) -> R
where
    B: Backend,
    M: Classifier<B> + ?Sized,
    F: FnOnce(&mut M) -> R,
{
    let previous = model.grad_enabled();
    model.set_grad_enabled(false);
    let out = f(model);
    model.set_grad_enabled(previous);
    out
}

/// Row-wise softmax over a `(batch, classes)` tensor.
pub fn softmax<B: Backend>(backend: &B, logits: &Tensor<B>) -> Result<Tensor<B>> {
    let (batch, classes) = logits.dims2()?;
    let mut probs = Tensor::zeros(backend, &[batch, classes]);
    backend.softmax(&logits.buf, probs.buf_mut(), batch, classes);
    Ok(probs)
}
