use crate::{
    backend::Backend,
    error::{Error, Result},
    tensor::Tensor,
};

/// A scalar loss and its gradient with respect to the logits it was computed from.
#[derive(Debug)]
pub struct LossOutput<B: Backend> {
    pub value: f32,
    pub grad: Tensor<B>,
}

pub trait Loss<B: Backend> {
    fn forward(&self, logits: &Tensor<B>, targets: &[usize]) -> Result<LossOutput<B>>;
}

/// Mean softmax cross-entropy over raw logits.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss<B: Backend> {
    backend: B,
}

impl<B: Backend> CrossEntropyLoss<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: Backend> Loss<B> for CrossEntropyLoss<B> {
    fn forward(&self, logits: &Tensor<B>, targets: &[usize]) -> Result<LossOutput<B>> {
        let (batch, classes) = logits.dims2()?;
        if targets.len() != batch {
            return Err(Error::shape(&[batch], &[targets.len()]));
        }
        if let Some(&label) = targets.iter().find(|&&t| t >= classes) {
            return Err(Error::LabelOutOfRange { label, num_classes: classes });
        }

        let mut grad = Tensor::zeros(&self.backend, &[batch, classes]);
        let value = self.backend.softmax_xent(&logits.buf, targets, grad.buf_mut(), batch, classes);
        if !value.is_finite() {
            return Err(Error::NonFiniteLoss(value));
        }
        Ok(LossOutput { value, grad })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use approx::assert_relative_eq;

    fn logits(data: &[f32], shape: &[usize]) -> Tensor<CpuBackend> {
        Tensor::from_host(&CpuBackend, data, shape).unwrap()
    }

    #[test]
    fn confident_correct_prediction_has_small_loss() {
        let loss = CrossEntropyLoss::new(CpuBackend);
        let out = loss.forward(&logits(&[10.0, 0.0, 0.0], &[1, 3]), &[0]).unwrap();
        assert!(out.value < 1e-3);
        let wrong = loss.forward(&logits(&[10.0, 0.0, 0.0], &[1, 3]), &[2]).unwrap();
        assert_relative_eq!(wrong.value, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn gradient_rows_sum_to_zero() {
        let loss = CrossEntropyLoss::new(CpuBackend);
        let out = loss
            .forward(&logits(&[0.3, -1.0, 2.0, 0.0, 0.5, 0.5], &[2, 3]), &[1, 2])
            .unwrap();
        for row in out.grad.to_host(&CpuBackend).chunks(3) {
            assert_relative_eq!(row.iter().sum::<f32>(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn rejects_out_of_range_labels_and_length_mismatch() {
        let loss = CrossEntropyLoss::new(CpuBackend);
        let x = logits(&[0.0; 6], &[2, 3]);
        assert_eq!(
            loss.forward(&x, &[0, 3]).unwrap_err(),
            Error::LabelOutOfRange { label: 3, num_classes: 3 }
        );
        assert!(matches!(loss.forward(&x, &[0]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn nan_logits_surface_as_an_error() {
        let loss = CrossEntropyLoss::new(CpuBackend);
        let err = loss.forward(&logits(&[f32::NAN, 0.0], &[1, 2]), &[0]).unwrap_err();
        assert!(matches!(err, Error::NonFiniteLoss(_)));
    }
}
