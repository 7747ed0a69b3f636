use crate::{
    backend::Backend,
    data::DataLoader,
    error::{Error, Result},
    nn::{no_grad, Classifier, Loss, Optimizer},
    tensor::Tensor,
};
use tracing::{debug, info};

/// Runs one pass over `loader` in Train mode and returns the mean of the
/// per-batch losses.
///
/// `epoch` is zero-based; the log line reports it one-based.
pub fn train_epoch<B, M, D, O, L>(
    model: &mut M,
    loader: &D,
    optimizer: &mut O,
    loss_fn: &L,
    epoch: usize,
) -> Result<f32>
where
    B: Backend,
    M: Classifier<B> + ?Sized,
    D: DataLoader<B> + ?Sized,
    O: Optimizer<B> + ?Sized,
    L: Loss<B> + ?Sized,
{
    model.train();
    let num_batches = loader.num_batches();

    let mut total_loss = 0.0f32;
    let mut seen = 0usize;
    for (batch_idx, batch) in loader.batches().enumerate() {
        let batch = batch?;

        optimizer.zero_grad(model.params_mut());
        let logits = model.forward(&batch.inputs)?;
        check_width(&*model, &logits)?;
        let loss = loss_fn.forward(&logits, &batch.targets)?;
        model.backward(&loss.grad)?;
        optimizer.step(model.params_mut())?;

        total_loss += loss.value;
        seen += 1;
        debug!(epoch = epoch + 1, batch = batch_idx + 1, num_batches, loss = loss.value, "train batch");
    }

    if seen == 0 {
        return Err(Error::EmptyDataSource);
    }
    let average = total_loss / seen as f32;
    info!("[Training set] Epoch: {}, Average loss: {:.4}", epoch + 1, average);
    Ok(average)
}

/// Runs one pass over `loader` in Eval mode with gradient tracking off and
/// returns the fraction of samples whose argmax prediction matches the label.
pub fn evaluate_epoch<B, M, D>(model: &mut M, loader: &D, epoch: usize) -> Result<f32>
where
    B: Backend,
    M: Classifier<B> + ?Sized,
    D: DataLoader<B> + ?Sized,
{
    model.eval();
    let (correct, total) = no_grad(model, |model| -> Result<(usize, usize)> {
        let mut correct = 0usize;
        let mut total = 0usize;
        for (batch_idx, batch) in loader.batches().enumerate() {
            let batch = batch?;
            let probs = model.forward(&batch.inputs)?;
            check_width(&*model, &probs)?;
            let predicted = argmax_rows(model.backend(), &probs)?;
            if predicted.len() != batch.targets.len() {
                return Err(Error::shape(&[batch.targets.len()], &[predicted.len()]));
            }
            let hits = predicted.iter().zip(&batch.targets).filter(|(p, t)| p == t).count();
            correct += hits;
            total += batch.targets.len();
            debug!(epoch = epoch + 1, batch = batch_idx + 1, hits, size = batch.targets.len(), "eval batch");
        }
        Ok((correct, total))
    })?;

    if total == 0 {
        return Err(Error::EmptyDataSource);
    }
    let accuracy = correct as f32 / total as f32;
    info!("[Test set] Epoch: {}, Accuracy: {:.2}%", epoch + 1, accuracy * 100.0);
    Ok(accuracy)
}

/// Every output row must carry one score per class the model was built for.
fn check_width<B, M>(model: &M, output: &Tensor<B>) -> Result<()>
where
    B: Backend,
    M: Classifier<B> + ?Sized,
{
    let (rows, width) = output.dims2()?;
    if width != model.num_classes() {
        return Err(Error::shape(&[rows, model.num_classes()], &output.shape));
    }
    Ok(())
}

/// Index of the largest value in each row of a `(batch, classes)` tensor;
/// the first index wins ties.
pub fn argmax_rows<B: Backend>(backend: &B, scores: &Tensor<B>) -> Result<Vec<usize>> {
    let (_, classes) = scores.dims2()?;
    if classes == 0 {
        return Err(Error::shape(&[scores.batch_size(), 1], &scores.shape));
    }
    let host = scores.to_host(backend);
    Ok(host
        .chunks(classes)
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate().skip(1) {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::CpuBackend,
        data::InMemoryLoader,
        nn::{CrossEntropyLoss, Linear, Sequential, Sgd},
    };
    use rand::{rngs::StdRng, SeedableRng};

    /// Builds a 2 -> 3 stack but claims `claimed` classes.
    struct Mislabeled {
        stack: Sequential<CpuBackend>,
        claimed: usize,
    }

    impl Classifier<CpuBackend> for Mislabeled {
        fn backend(&self) -> &CpuBackend {
            &CpuBackend
        }
        fn stack(&self) -> &Sequential<CpuBackend> {
            &self.stack
        }
        fn stack_mut(&mut self) -> &mut Sequential<CpuBackend> {
            &mut self.stack
        }
        fn num_classes(&self) -> usize {
            self.claimed
        }
    }

    fn mislabeled(claimed: usize) -> Mislabeled {
        let mut rng = StdRng::seed_from_u64(8);
        Mislabeled {
            stack: Sequential::new(vec![Box::new(Linear::new(CpuBackend, 2, 3, &mut rng))]),
            claimed,
        }
    }

    fn two_samples() -> InMemoryLoader<CpuBackend> {
        InMemoryLoader::new(CpuBackend, vec![0.1, 0.2, 0.3, 0.4], vec![0, 1], &[2], 2).unwrap()
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        let scores = Tensor::from_host(&CpuBackend, &[0.2, 0.5, 0.5, 0.9, 0.1, 0.0, 0.3, 0.3, 0.3], &[3, 3]).unwrap();
        assert_eq!(argmax_rows(&CpuBackend, &scores).unwrap(), [1, 0, 0]);
    }

    #[test]
    fn output_width_must_match_num_classes() {
        let loader = two_samples();
        let mut model = mislabeled(5);
        let err = evaluate_epoch(&mut model, &loader, 0).unwrap_err();
        assert_eq!(err, Error::shape(&[2, 5], &[2, 3]));

        let mut opt = Sgd::new(CpuBackend, &mut model, 0.1, None).unwrap();
        let err = train_epoch(&mut model, &loader, &mut opt, &CrossEntropyLoss::new(CpuBackend), 0).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let mut honest = mislabeled(3);
        let accuracy = evaluate_epoch(&mut honest, &loader, 0).unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn argmax_needs_a_matrix() {
        let scores = Tensor::<CpuBackend>::zeros(&CpuBackend, &[4]);
        assert!(matches!(argmax_rows(&CpuBackend, &scores), Err(Error::RankMismatch { .. })));
    }
}
