use crate::{
    backend::Backend,
    error::{Error, Result},
    nn::{Classifier, Param},
    tensor::Tensor,
};

pub trait Optimizer<B: Backend> {
    /// Resets the accumulated gradient of every parameter to zero.
    fn zero_grad(&mut self, params: Vec<Param<'_, B>>);
    /// Applies one update to every parameter from its accumulated gradient.
    fn step(&mut self, params: Vec<Param<'_, B>>) -> Result<()>;
}

/// Stochastic gradient descent with optional momentum:
/// `v = momentum * v + lr * g; p -= v`.
///
/// Bound at construction to one classifier's parameter list; every step
/// checks it is handed the same list back.
pub struct Sgd<B: Backend> {
    lr: f32,
    momentum: Option<f32>,
    shapes: Vec<Vec<usize>>,
    velocities: Vec<Tensor<B>>,
    backend: B,
}

impl<B: Backend + Clone> Sgd<B> {
    pub fn new<M>(backend: B, model: &mut M, lr: f32, momentum: Option<f32>) -> Result<Self>
    where
        M: Classifier<B> + ?Sized,
    {
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!("learning rate {lr} must be positive")));
        }
        if let Some(m) = momentum {
            if !(0.0..1.0).contains(&m) {
                return Err(Error::InvalidConfig(format!("momentum {m} is outside [0, 1)")));
            }
        }

        let shapes: Vec<Vec<usize>> = model.params_mut().iter().map(|p| p.value.shape.clone()).collect();
        let velocities = match momentum {
            Some(_) => shapes.iter().map(|s| Tensor::zeros(&backend, s)).collect(),
            None => Vec::new(),
        };
        Ok(Self {
            lr,
            momentum,
            shapes,
            velocities,
            backend,
        })
    }

    fn check_binding(&self, params: &[Param<'_, B>]) -> Result<()> {
        if params.len() != self.shapes.len() {
            return Err(Error::ParamCountMismatch {
                expected: self.shapes.len(),
                actual: params.len(),
            });
        }
        for (param, shape) in params.iter().zip(&self.shapes) {
            if &param.value.shape != shape || &param.grad.shape != shape {
                return Err(Error::shape(shape, &param.grad.shape));
            }
        }
        Ok(())
    }
}

impl<B: Backend + Clone> Optimizer<B> for Sgd<B> {
    fn zero_grad(&mut self, params: Vec<Param<'_, B>>) {
        for param in params {
            param.grad.set_zero(&self.backend);
        }
    }

    fn step(&mut self, params: Vec<Param<'_, B>>) -> Result<()> {
        self.check_binding(&params)?;

        for (i, param) in params.into_iter().enumerate() {
            let n = param.value.len();
            let velocity = self.velocities.get_mut(i).map(|v| v.buf_mut());
            self.backend.sgd_step(
                param.value.buf_mut(),
                &param.grad.buf,
                self.lr,
                self.momentum,
                velocity,
                n,
            );
        }
        Ok(())
    }
}
