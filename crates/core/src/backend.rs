use crate::ops_cpu::{self, ConvGeometry};

/// Buffer storage plus the kernels the layers are built from. Layers only
/// ever talk to a `Backend`; the CPU implementation below is the reference.
pub trait Backend: Send + Sync + 'static {
    type Buf: Send + Sync + Clone;

    fn alloc(&self, len: usize) -> Self::Buf;
    fn upload(&self, host: &[f32]) -> Self::Buf;
    fn download(&self, buf: &Self::Buf, out: &mut [f32]);

    fn relu(&self, x: &Self::Buf, y: &mut Self::Buf, n: usize);
    fn drelu(&self, dy: &Self::Buf, x: &Self::Buf, dx: &mut Self::Buf, n: usize);

    /// C = alpha * A * B + beta * C (+ bias broadcast over rows).
    #[allow(clippy::too_many_arguments)]
    fn gemm(&self, a: &Self::Buf, b: &Self::Buf, c: &mut Self::Buf,
            m: usize, n: usize, k: usize, alpha: f32, beta: f32, bias: Option<&Self::Buf>);
    fn transpose(&self, a: &Self::Buf, out: &mut Self::Buf, rows: usize, cols: usize);

    fn softmax(&self, logits: &Self::Buf, probs: &mut Self::Buf, batch: usize, classes: usize);
    /// Returns the batch-mean loss and writes its gradient w.r.t. the logits.
    fn softmax_xent(&self, logits: &Self::Buf, labels: &[usize], dlogits: &mut Self::Buf,
                    batch: usize, classes: usize) -> f32;

    #[allow(clippy::too_many_arguments)]
    fn sgd_step(&self, params: &mut Self::Buf, grads: &Self::Buf, lr: f32, momentum: Option<f32>,
                velocity: Option<&mut Self::Buf>, n: usize);

    fn im2col(&self, input: &Self::Buf, cols: &mut Self::Buf, geo: &ConvGeometry);
    /// Accumulates into `output`.
    fn col2im(&self, cols: &Self::Buf, output: &mut Self::Buf, geo: &ConvGeometry);

    fn maxpool2d(&self, input: &Self::Buf, output: &mut Self::Buf, indices: &mut [usize],
                 input_dims: (usize, usize, usize, usize),
                 kernel_size: (usize, usize),
                 stride: (usize, usize));
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Buf = Vec<f32>;

    fn alloc(&self, len: usize) -> Self::Buf {
        vec![0.0; len]
    }

    fn upload(&self, host: &[f32]) -> Self::Buf {
        host.to_vec()
    }

    fn download(&self, buf: &Self::Buf, out: &mut [f32]) {
        out.copy_from_slice(buf);
    }

    fn relu(&self, x: &Self::Buf, y: &mut Self::Buf, n: usize) {
        ops_cpu::relu_forward(&x[..n], &mut y[..n]);
    }

    fn drelu(&self, dy: &Self::Buf, x: &Self::Buf, dx: &mut Self::Buf, n: usize) {
        ops_cpu::relu_backward(&dy[..n], &x[..n], &mut dx[..n]);
    }

    fn gemm(&self, a: &Self::Buf, b: &Self::Buf, c: &mut Self::Buf,
            m: usize, n: usize, k: usize, alpha: f32, beta: f32, bias: Option<&Self::Buf>) {
        ops_cpu::naive_gemm(a, b, c, m, n, k, alpha, beta);
        if let Some(bias_buf) = bias {
            ops_cpu::add_bias(c, bias_buf, m, n);
        }
    }

    fn transpose(&self, a: &Self::Buf, out: &mut Self::Buf, rows: usize, cols: usize) {
        ops_cpu::transpose(a, out, rows, cols);
    }

    fn softmax(&self, logits: &Self::Buf, probs: &mut Self::Buf, batch: usize, classes: usize) {
        ops_cpu::softmax_forward(logits, probs, batch, classes);
    }

    fn softmax_xent(&self, logits: &Self::Buf, labels: &[usize], dlogits: &mut Self::Buf,
                    batch: usize, classes: usize) -> f32 {
        ops_cpu::softmax_cross_entropy(logits, labels, dlogits, batch, classes)
    }

    fn sgd_step(&self, params: &mut Self::Buf, grads: &Self::Buf, lr: f32, momentum: Option<f32>,
                velocity: Option<&mut Self::Buf>, n: usize) {
        match (momentum, velocity) {
            (Some(mom), Some(vel)) => {
                for i in 0..n {
                    vel[i] = mom * vel[i] + lr * grads[i];
                    params[i] -= vel[i];
                }
            }
            _ => {
                for i in 0..n {
                    params[i] -= lr * grads[i];
                }
            }
        }
    }

    fn im2col(&self, input: &Self::Buf, cols: &mut Self::Buf, geo: &ConvGeometry) {
        ops_cpu::im2col(input, cols, geo);
    }

    fn col2im(&self, cols: &Self::Buf, output: &mut Self::Buf, geo: &ConvGeometry) {
        ops_cpu::col2im(cols, output, geo);
    }

    fn maxpool2d(&self, input: &Self::Buf, output: &mut Self::Buf, indices: &mut [usize],
                 input_dims: (usize, usize, usize, usize),
                 kernel_size: (usize, usize),
                 stride: (usize, usize)) {
        ops_cpu::maxpool2d_forward(input, output, indices, input_dims, kernel_size, stride);
    }
}
