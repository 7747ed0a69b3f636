use approx::assert_relative_eq;
use rand::{rngs::StdRng, SeedableRng};
use scene_core::{
    backend::CpuBackend,
    data::{ClassBlobs, DataLoader, InMemoryLoader},
    nn::{Classifier, ConvClassifier, CrossEntropyLoss, DenseClassifier, Loss, LossOutput, Sgd},
    tensor::Tensor,
    train::{argmax_rows, evaluate_epoch, train_epoch},
    Error,
};
use std::cell::RefCell;

/// Cross-entropy that remembers every value it hands back.
struct RecordingLoss {
    inner: CrossEntropyLoss<CpuBackend>,
    seen: RefCell<Vec<f32>>,
}

impl RecordingLoss {
    fn new() -> Self {
        Self {
            inner: CrossEntropyLoss::new(CpuBackend),
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl Loss<CpuBackend> for RecordingLoss {
    fn forward(&self, logits: &Tensor<CpuBackend>, targets: &[usize]) -> scene_core::Result<LossOutput<CpuBackend>> {
        let out = self.inner.forward(logits, targets)?;
        self.seen.borrow_mut().push(out.value);
        Ok(out)
    }
}

fn blobs(seed: u64, classes: usize, sample_shape: &[usize]) -> (ClassBlobs, StdRng) {
    let mut rng = StdRng::seed_from_u64(seed);
    let blobs = ClassBlobs::new(&mut rng, classes, sample_shape, 0.1).unwrap();
    (blobs, rng)
}

fn snapshot<M: Classifier<CpuBackend>>(model: &mut M) -> Vec<Vec<f32>> {
    model.params_mut().iter().map(|p| p.value.to_host(&CpuBackend)).collect()
}

#[test]
fn dense_epoch_loss_is_mean_of_its_two_batches() {
    let (blobs, mut rng) = blobs(7, 10, &[28, 28]);
    let loader = blobs.loader(CpuBackend, &mut rng, 8, 4).unwrap();
    assert_eq!(loader.num_batches(), 2);

    let mut model = DenseClassifier::new(CpuBackend, (28, 28), 10, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.01, Some(0.9)).unwrap();
    let loss_fn = RecordingLoss::new();

    let reported = train_epoch(&mut model, &loader, &mut opt, &loss_fn, 0).unwrap();
    let seen = loss_fn.seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_relative_eq!(reported, (seen[0] + seen[1]) / 2.0, epsilon = 1e-6);
}

#[test]
fn every_parameter_with_a_gradient_moves() {
    let (blobs, mut rng) = blobs(3, 4, &[6, 6]);
    let loader = blobs.loader(CpuBackend, &mut rng, 16, 8).unwrap();
    let mut model = DenseClassifier::new(CpuBackend, (6, 6), 4, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.1, None).unwrap();
    let before = snapshot(&mut model);

    train_epoch(&mut model, &loader, &mut opt, &CrossEntropyLoss::new(CpuBackend), 0).unwrap();

    let mut moved = 0;
    for (param, old) in model.params_mut().iter().zip(&before) {
        let has_grad = param.grad.to_host(&CpuBackend).iter().any(|&g| g != 0.0);
        if has_grad {
            assert_ne!(&param.value.to_host(&CpuBackend), old, "{} did not change", param.name);
            moved += 1;
        }
    }
    assert!(moved > 0);
}

#[test]
fn evaluation_matches_manual_count_and_is_repeatable() {
    let (blobs, mut rng) = blobs(5, 3, &[4, 4]);
    let loader = blobs.loader(CpuBackend, &mut rng, 11, 4).unwrap();
    let mut model = DenseClassifier::new(CpuBackend, (4, 4), 3, &mut rng).unwrap();
    let before = snapshot(&mut model);

    let first = evaluate_epoch(&mut model, &loader, 0).unwrap();
    let second = evaluate_epoch(&mut model, &loader, 1).unwrap();
    assert_eq!(first, second);
    assert_eq!(snapshot(&mut model), before);
    assert!(model.grad_enabled());

    let mut correct = 0;
    for batch in loader.batches() {
        let batch = batch.unwrap();
        let probs = model.forward(&batch.inputs).unwrap();
        let predicted = argmax_rows(&CpuBackend, &probs).unwrap();
        correct += predicted.iter().zip(&batch.targets).filter(|(p, t)| p == t).count();
    }
    assert_relative_eq!(first, correct as f32 / 11.0);
}

#[test]
fn dense_learns_separable_blobs() {
    let (blobs, mut rng) = blobs(21, 4, &[8, 8]);
    let train = blobs.loader(CpuBackend, &mut rng, 64, 8).unwrap();
    let test = blobs.loader(CpuBackend, &mut rng, 32, 8).unwrap();
    let mut model = DenseClassifier::new(CpuBackend, (8, 8), 4, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.05, Some(0.9)).unwrap();
    let loss_fn = CrossEntropyLoss::new(CpuBackend);

    let first = train_epoch(&mut model, &train, &mut opt, &loss_fn, 0).unwrap();
    let mut last = first;
    for epoch in 1..5 {
        last = train_epoch(&mut model, &train, &mut opt, &loss_fn, epoch).unwrap();
    }
    assert!(last < first, "loss went from {first} to {last}");
    assert!(evaluate_epoch(&mut model, &test, 4).unwrap() > 0.5);
}

#[test]
fn conv_epoch_runs_end_to_end() {
    let (blobs, mut rng) = blobs(9, 5, &[3, 32, 32]);
    let train = blobs.loader(CpuBackend, &mut rng, 6, 4).unwrap();
    let mut model = ConvClassifier::new(CpuBackend, (32, 32), 5, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.01, Some(0.9)).unwrap();
    let before = snapshot(&mut model);

    let loss = train_epoch(&mut model, &train, &mut opt, &CrossEntropyLoss::new(CpuBackend), 0).unwrap();
    assert!(loss.is_finite() && loss > 0.0);
    let after = snapshot(&mut model);
    assert_eq!(after.len(), 14);
    for (i, (new, old)) in after.iter().zip(&before).enumerate() {
        assert_ne!(new, old, "parameter {i} did not change");
    }

    let accuracy = evaluate_epoch(&mut model, &train, 0).unwrap();
    assert!((0.0..=1.0).contains(&accuracy));
}

#[test]
fn out_of_range_label_aborts_the_epoch() {
    let images = vec![0.5; 3 * 4];
    let loader = InMemoryLoader::new(CpuBackend, images, vec![0, 1, 12], &[2, 2], 2).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = DenseClassifier::new(CpuBackend, (2, 2), 10, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.1, None).unwrap();

    let err = train_epoch(&mut model, &loader, &mut opt, &CrossEntropyLoss::new(CpuBackend), 0).unwrap_err();
    assert_eq!(err, Error::LabelOutOfRange { label: 12, num_classes: 10 });
    assert!(!err.is_configuration());
}

#[test]
fn wrong_input_size_surfaces_from_training() {
    let (blobs, mut rng) = blobs(1, 10, &[32, 32]);
    let loader = blobs.loader(CpuBackend, &mut rng, 4, 4).unwrap();
    let mut model = DenseClassifier::new(CpuBackend, (28, 28), 10, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.1, None).unwrap();

    let err = train_epoch(&mut model, &loader, &mut opt, &CrossEntropyLoss::new(CpuBackend), 0).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn empty_source_is_an_error_for_both_loops() {
    let loader = InMemoryLoader::new(CpuBackend, Vec::new(), Vec::new(), &[2, 2], 4).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = DenseClassifier::new(CpuBackend, (2, 2), 3, &mut rng).unwrap();
    let mut opt = Sgd::new(CpuBackend, &mut model, 0.1, None).unwrap();

    assert_eq!(evaluate_epoch(&mut model, &loader, 0).unwrap_err(), Error::EmptyDataSource);
    let err = train_epoch(&mut model, &loader, &mut opt, &CrossEntropyLoss::new(CpuBackend), 0).unwrap_err();
    assert_eq!(err, Error::EmptyDataSource);
}
