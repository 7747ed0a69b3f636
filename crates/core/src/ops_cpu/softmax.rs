pub fn softmax_forward(logits: &[f32], output: &mut [f32], batch_size: usize, num_classes: usize) {
    for b in 0..batch_size {
        let offset = b * num_classes;
        let logits_batch = &logits[offset..offset + num_classes];
        let output_batch = &mut output[offset..offset + num_classes];

        let max_logit = logits_batch.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum_exp = 0.0;
        for (i, &logit) in logits_batch.iter().enumerate() {
            let exp_val = (logit - max_logit).exp();
            output_batch[i] = exp_val;
            sum_exp += exp_val;
        }

        for prob in output_batch.iter_mut() {
            *prob /= sum_exp;
        }
    }
}

/// Mean softmax cross-entropy over the batch. Writes `d loss / d logits` into
/// `grad_logits` and returns the loss.
pub fn softmax_cross_entropy(
    logits: &[f32], labels: &[usize], grad_logits: &mut [f32],
    batch_size: usize, num_classes: usize
) -> f32 {
    let mut total_loss = 0.0;
    let scale = 1.0 / batch_size as f32;

    for b in 0..batch_size {
        let offset = b * num_classes;
        let row = &logits[offset..offset + num_classes];
        let label = labels[b];

        let max_logit = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let sum_exp: f32 = row.iter().map(|&l| (l - max_logit).exp()).sum();
        let log_sum_exp = max_logit + sum_exp.ln();

        // log-softmax of the true class
        total_loss -= row[label] - log_sum_exp;

        for c in 0..num_classes {
            let prob = (row[c] - log_sum_exp).exp();
            let target = if c == label { 1.0 } else { 0.0 };
            grad_logits[offset + c] = (prob - target) * scale;
        }
    }

    total_loss * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_logits_give_log_num_classes() {
        let logits = [0.0f32; 8];
        let mut grad = [0.0f32; 8];
        let loss = softmax_cross_entropy(&logits, &[1, 3], &mut grad, 2, 4);
        assert_relative_eq!(loss, 4.0f32.ln(), epsilon = 1e-6);
        // (0.25 - 1) / 2 at the target, 0.25 / 2 elsewhere
        assert_relative_eq!(grad[1], -0.375, epsilon = 1e-6);
        assert_relative_eq!(grad[0], 0.125, epsilon = 1e-6);
    }

    #[test]
    fn large_logits_stay_finite() {
        let logits = [1000.0f32, 0.0, -1000.0];
        let mut probs = [0.0f32; 3];
        softmax_forward(&logits, &mut probs, 1, 3);
        assert_relative_eq!(probs[0], 1.0);
        let mut grad = [0.0f32; 3];
        let loss = softmax_cross_entropy(&logits, &[2], &mut grad, 1, 3);
        assert!(loss.is_finite());
        assert_relative_eq!(loss, 2000.0, epsilon = 1e-2);
    }
}
