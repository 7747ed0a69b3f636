use crate::{
    backend::Backend,
    error::{Error, Result},
    nn::init::{self, Init},
    nn::shape,
    ops_cpu::ConvGeometry,
    tensor::Tensor,
};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

/// Whether a stack computes its training path or its inference path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// Per-call context handed to every layer's forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub mode: Mode,
    /// Keep whatever backward will need. Off inside a no-grad scope.
    pub record: bool,
}

/// A trainable tensor and the gradient accumulated for it.
pub struct Param<'a, B: Backend> {
    pub name: &'static str,
    pub value: &'a mut Tensor<B>,
    pub grad: &'a mut Tensor<B>,
}

pub trait Layer<B: Backend> {
    fn name(&self) -> &'static str;
    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>>;
    /// Accumulates parameter gradients and returns the gradient w.r.t. the
    /// input of the last recorded forward.
    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>>;
    fn params(&mut self) -> Vec<Param<'_, B>> {
        Vec::new()
    }
    fn init_params(&mut self, _init: Init, _rng: &mut dyn RngCore) {}
    /// Drops anything cached by a recorded forward.
    fn clear_cache(&mut self) {}
}

fn check_dy(dy: &[usize], expected: &[usize]) -> Result<()> {
    if dy != expected {
        return Err(Error::shape(expected, dy));
    }
    Ok(())
}

pub struct Linear<B: Backend> {
    pub w: Tensor<B>, // (in_features, out_features)
    pub b: Tensor<B>, // (out_features,)
    pub dw: Tensor<B>,
    pub db: Tensor<B>,
    pub last_input: Option<Tensor<B>>,
    in_features: usize,
    out_features: usize,
    backend: B,
}

impl<B: Backend + Clone> Linear<B> {
    pub fn new(backend: B, in_features: usize, out_features: usize, rng: &mut dyn RngCore) -> Self {
        let mut layer = Self {
            w: Tensor::zeros(&backend, &[in_features, out_features]),
            b: Tensor::zeros(&backend, &[out_features]),
            dw: Tensor::zeros(&backend, &[in_features, out_features]),
            db: Tensor::zeros(&backend, &[out_features]),
            last_input: None,
            in_features,
            out_features,
            backend,
        };
        layer.init_params(Init::FanInUniform, rng);
        layer
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl<B: Backend + Clone> Layer<B> for Linear<B> {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        let (batch_size, in_features) = x.dims2()?;
        if in_features != self.in_features {
            return Err(Error::shape(&[batch_size, self.in_features], &x.shape));
        }

        let mut output = Tensor::zeros(&self.backend, &[batch_size, self.out_features]);
        self.backend.gemm(
            &x.buf, &self.w.buf, output.buf_mut(),
            batch_size, self.out_features, in_features,
            1.0, 0.0, Some(&self.b.buf)
        );

        if pass.record {
            self.last_input = Some(x.clone());
        }
        Ok(output)
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let x = self.last_input.take().ok_or(Error::MissingForward("linear"))?;
        let batch_size = x.batch_size();
        let (in_features, out_features) = (self.in_features, self.out_features);
        check_dy(&dy.shape, &[batch_size, out_features])?;

        // dW += X^T * dY  => (in, out)
        let mut xt = Tensor::zeros(&self.backend, &[in_features, batch_size]);
        self.backend.transpose(&x.buf, xt.buf_mut(), batch_size, in_features);
        self.backend.gemm(
            &xt.buf, &dy.buf, self.dw.buf_mut(),
            in_features, out_features, batch_size,
            1.0, 1.0, None
        );

        // db += 1^T * dY  => (out,)
        let ones = self.backend.upload(&vec![1.0; batch_size]);
        self.backend.gemm(
            &ones, &dy.buf, self.db.buf_mut(),
            1, out_features, batch_size,
            1.0, 1.0, None
        );

        // dX = dY * W^T  => (batch, in)
        let mut wt = Tensor::zeros(&self.backend, &[out_features, in_features]);
        self.backend.transpose(&self.w.buf, wt.buf_mut(), in_features, out_features);
        let mut dx = Tensor::zeros(&self.backend, &[batch_size, in_features]);
        self.backend.gemm(
            &dy.buf, &wt.buf, dx.buf_mut(),
            batch_size, in_features, out_features,
            1.0, 0.0, None
        );
        Ok(dx)
    }

    fn params(&mut self) -> Vec<Param<'_, B>> {
        vec![
            Param { name: "linear.weight", value: &mut self.w, grad: &mut self.dw },
            Param { name: "linear.bias", value: &mut self.b, grad: &mut self.db },
        ]
    }

    fn init_params(&mut self, init: Init, rng: &mut dyn RngCore) {
        let (fan_in, fan_out) = (self.in_features, self.out_features);
        let (w, b) = match init {
            Init::XavierUniform => (
                init::xavier_uniform(rng, fan_in, fan_out, fan_in * fan_out),
                vec![0.0; fan_out],
            ),
            Init::FanInUniform => (
                init::fan_in_uniform(rng, fan_in, fan_in * fan_out),
                init::fan_in_uniform(rng, fan_in, fan_out),
            ),
        };
        self.w = Tensor::from_buf(self.backend.upload(&w), &[fan_in, fan_out]);
        self.b = Tensor::from_buf(self.backend.upload(&b), &[fan_out]);
    }

    fn clear_cache(&mut self) {
        self.last_input = None;
    }
}

pub struct ReLU<B: Backend> {
    last_input: Option<Tensor<B>>,
    backend: B,
}

impl<B: Backend + Clone> ReLU<B> {
    pub fn new(backend: B) -> Self {
        Self {
            last_input: None,
            backend,
        }
    }
}

impl<B: Backend + Clone> Layer<B> for ReLU<B> {
    fn name(&self) -> &'static str {
        "relu"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        let mut output = Tensor::zeros(&self.backend, &x.shape);
        self.backend.relu(&x.buf, output.buf_mut(), x.len());
        if pass.record {
            self.last_input = Some(x.clone());
        }
        Ok(output)
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let x = self.last_input.take().ok_or(Error::MissingForward("relu"))?;
        check_dy(&dy.shape, &x.shape)?;
        let mut dx = Tensor::zeros(&self.backend, &x.shape);
        self.backend.drelu(&dy.buf, &x.buf, dx.buf_mut(), x.len());
        Ok(dx)
    }

    fn clear_cache(&mut self) {
        self.last_input = None;
    }
}

/// Collapses every axis after the batch axis.
#[derive(Default)]
pub struct Flatten {
    last_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Layer<B> for Flatten {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        if x.shape.is_empty() {
            return Err(Error::RankMismatch { expected: 2, actual: x.shape.clone() });
        }
        if pass.record {
            self.last_shape = Some(x.shape.clone());
        }
        x.reshape(&[x.batch_size(), x.features()])
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let shape = self.last_shape.take().ok_or(Error::MissingForward("flatten"))?;
        dy.reshape(&shape)
    }

    fn clear_cache(&mut self) {
        self.last_shape = None;
    }
}

struct ConvCache<B: Backend> {
    cols: Tensor<B>,
    geo: ConvGeometry,
}

pub struct Conv2d<B: Backend> {
    pub w: Tensor<B>, // (out_channels, in_channels * kernel_h * kernel_w)
    pub b: Tensor<B>, // (out_channels,)
    pub dw: Tensor<B>,
    pub db: Tensor<B>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: (usize, usize),
    pub padding: (usize, usize),
    pub stride: (usize, usize),
    cache: Option<ConvCache<B>>,
    backend: B,
}

impl<B: Backend + Clone> Conv2d<B> {
    pub fn new(backend: B, in_channels: usize, out_channels: usize,
               kernel_size: (usize, usize), padding: (usize, usize), stride: (usize, usize),
               rng: &mut dyn RngCore) -> Self {
        let patch = in_channels * kernel_size.0 * kernel_size.1;
        let mut layer = Self {
            w: Tensor::zeros(&backend, &[out_channels, patch]),
            b: Tensor::zeros(&backend, &[out_channels]),
            dw: Tensor::zeros(&backend, &[out_channels, patch]),
            db: Tensor::zeros(&backend, &[out_channels]),
            in_channels,
            out_channels,
            kernel_size,
            padding,
            stride,
            cache: None,
            backend,
        };
        layer.init_params(Init::FanInUniform, rng);
        layer
    }

    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel_size.0 * self.kernel_size.1
    }
}

impl<B: Backend + Clone> Layer<B> for Conv2d<B> {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        let (batch_size, channels, input_h, input_w) = x.dims4()?;
        if channels != self.in_channels {
            return Err(Error::shape(&[batch_size, self.in_channels, input_h, input_w], &x.shape));
        }
        let (output_h, output_w) =
            shape::conv2d_output((input_h, input_w), self.kernel_size, self.stride, self.padding)?;
        let geo = ConvGeometry {
            input: (batch_size, channels, input_h, input_w),
            kernel: self.kernel_size,
            padding: self.padding,
            stride: self.stride,
            output: (output_h, output_w),
        };

        // (C*kh*kw, N*oh*ow)
        let (col_rows, col_cols) = (geo.col_rows(), geo.col_cols());
        let mut cols = Tensor::zeros(&self.backend, &[col_rows, col_cols]);
        self.backend.im2col(&x.buf, cols.buf_mut(), &geo);

        // W x cols => (out_channels, N*oh*ow)
        let mut product = Tensor::zeros(&self.backend, &[self.out_channels, col_cols]);
        self.backend.gemm(
            &self.w.buf, &cols.buf, product.buf_mut(),
            self.out_channels, col_cols, col_rows,
            1.0, 0.0, None
        );

        // (out_channels, N, oh*ow) -> (N, out_channels, oh, ow), plus bias
        let spatial = output_h * output_w;
        let product = product.to_host(&self.backend);
        let bias = self.b.to_host(&self.backend);
        let mut output = vec![0.0f32; batch_size * self.out_channels * spatial];
        for n in 0..batch_size {
            for c in 0..self.out_channels {
                for s in 0..spatial {
                    output[(n * self.out_channels + c) * spatial + s] =
                        product[c * col_cols + n * spatial + s] + bias[c];
                }
            }
        }

        if pass.record {
            self.cache = Some(ConvCache { cols, geo });
        }
        Ok(Tensor::from_buf(
            self.backend.upload(&output),
            &[batch_size, self.out_channels, output_h, output_w],
        ))
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let ConvCache { cols, geo } = self.cache.take().ok_or(Error::MissingForward("conv2d"))?;
        let (batch_size, channels, input_h, input_w) = geo.input;
        let (output_h, output_w) = geo.output;
        check_dy(&dy.shape, &[batch_size, self.out_channels, output_h, output_w])?;

        let spatial = output_h * output_w;
        let col_cols = geo.col_cols();
        let patch = self.patch_len();

        // dY as (out_channels, N*oh*ow), and per-channel sums for the bias
        let dy_host = dy.to_host(&self.backend);
        let mut dy_mat = vec![0.0f32; self.out_channels * col_cols];
        let mut db = self.db.to_host(&self.backend);
        for n in 0..batch_size {
            for c in 0..self.out_channels {
                for s in 0..spatial {
                    let g = dy_host[(n * self.out_channels + c) * spatial + s];
                    dy_mat[c * col_cols + n * spatial + s] = g;
                    db[c] += g;
                }
            }
        }
        self.db.write_host(&self.backend, &db)?;
        let dy_mat = self.backend.upload(&dy_mat);

        // dW += dY_mat * cols^T
        let mut cols_t = Tensor::zeros(&self.backend, &[col_cols, patch]);
        self.backend.transpose(&cols.buf, cols_t.buf_mut(), patch, col_cols);
        self.backend.gemm(
            &dy_mat, &cols_t.buf, self.dw.buf_mut(),
            self.out_channels, patch, col_cols,
            1.0, 1.0, None
        );

        // dcols = W^T * dY_mat, folded back onto the input
        let mut wt = Tensor::zeros(&self.backend, &[patch, self.out_channels]);
        self.backend.transpose(&self.w.buf, wt.buf_mut(), self.out_channels, patch);
        let mut dcols = Tensor::zeros(&self.backend, &[patch, col_cols]);
        self.backend.gemm(
            &wt.buf, &dy_mat, dcols.buf_mut(),
            patch, col_cols, self.out_channels,
            1.0, 0.0, None
        );
        let mut dx = Tensor::zeros(&self.backend, &[batch_size, channels, input_h, input_w]);
        self.backend.col2im(&dcols.buf, dx.buf_mut(), &geo);
        Ok(dx)
    }

    fn params(&mut self) -> Vec<Param<'_, B>> {
        vec![
            Param { name: "conv2d.weight", value: &mut self.w, grad: &mut self.dw },
            Param { name: "conv2d.bias", value: &mut self.b, grad: &mut self.db },
        ]
    }

    fn init_params(&mut self, init: Init, rng: &mut dyn RngCore) {
        let patch = self.patch_len();
        let fan_in = patch;
        let fan_out = self.out_channels * self.kernel_size.0 * self.kernel_size.1;
        let (w, b) = match init {
            Init::XavierUniform => (
                init::xavier_uniform(rng, fan_in, fan_out, self.out_channels * patch),
                vec![0.0; self.out_channels],
            ),
            Init::FanInUniform => (
                init::fan_in_uniform(rng, fan_in, self.out_channels * patch),
                init::fan_in_uniform(rng, fan_in, self.out_channels),
            ),
        };
        self.w = Tensor::from_buf(self.backend.upload(&w), &[self.out_channels, patch]);
        self.b = Tensor::from_buf(self.backend.upload(&b), &[self.out_channels]);
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }
}

pub struct MaxPool2d<B: Backend> {
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    // input shape and argmax indices of the last recorded forward
    last: Option<(Vec<usize>, Vec<usize>)>,
    backend: B,
}

impl<B: Backend + Clone> MaxPool2d<B> {
    pub fn new(backend: B, kernel_size: (usize, usize), stride: (usize, usize)) -> Self {
        Self {
            kernel_size,
            stride,
            last: None,
            backend,
        }
    }
}

impl<B: Backend + Clone> Layer<B> for MaxPool2d<B> {
    fn name(&self) -> &'static str {
        "maxpool2d"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        let (batch_size, channels, input_h, input_w) = x.dims4()?;
        let (output_h, output_w) = shape::pool2d_output((input_h, input_w), self.kernel_size, self.stride)?;

        let out_shape = [batch_size, channels, output_h, output_w];
        let mut output = Tensor::zeros(&self.backend, &out_shape);
        let mut indices = vec![0usize; output.len()];
        self.backend.maxpool2d(
            &x.buf,
            output.buf_mut(),
            &mut indices,
            (batch_size, channels, input_h, input_w),
            self.kernel_size,
            self.stride
        );

        if pass.record {
            self.last = Some((x.shape.clone(), indices));
        }
        Ok(output)
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let (input_shape, indices) = self.last.take().ok_or(Error::MissingForward("maxpool2d"))?;
        if dy.len() != indices.len() {
            return Err(Error::shape(&[indices.len()], &[dy.len()]));
        }

        // scatter each gradient back to the input element that won the max
        let dy_host = dy.to_host(&self.backend);
        let mut dx = vec![0.0f32; input_shape.iter().product()];
        for (&winner, &g) in indices.iter().zip(&dy_host) {
            dx[winner] += g;
        }
        Ok(Tensor::from_buf(self.backend.upload(&dx), &input_shape))
    }

    fn clear_cache(&mut self) {
        self.last = None;
    }
}

struct NormCache {
    x_hat: Vec<f32>,
    inv_std: Vec<f32>,
    shape: Vec<usize>,
    batch_stats: bool,
}

/// Per-channel normalization over `(N, H, W)` with a learned scale and shift.
/// Train mode normalizes with batch statistics and updates the running
/// estimates; Eval mode normalizes with the running estimates.
pub struct BatchNorm2d<B: Backend> {
    pub gamma: Tensor<B>,
    pub beta: Tensor<B>,
    pub dgamma: Tensor<B>,
    pub dbeta: Tensor<B>,
    pub running_mean: Vec<f32>,
    pub running_var: Vec<f32>,
    pub eps: f32,
    pub momentum: f32,
    channels: usize,
    cache: Option<NormCache>,
    backend: B,
}

impl<B: Backend + Clone> BatchNorm2d<B> {
    pub fn new(backend: B, channels: usize) -> Self {
        Self {
            gamma: Tensor::from_buf(backend.upload(&vec![1.0; channels]), &[channels]),
            beta: Tensor::zeros(&backend, &[channels]),
            dgamma: Tensor::zeros(&backend, &[channels]),
            dbeta: Tensor::zeros(&backend, &[channels]),
            running_mean: vec![0.0; channels],
            running_var: vec![1.0; channels],
            eps: 1e-5,
            momentum: 0.1,
            channels,
            cache: None,
            backend,
        }
    }
}

impl<B: Backend + Clone> Layer<B> for BatchNorm2d<B> {
    fn name(&self) -> &'static str {
        "batchnorm2d"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        let (batch_size, channels, h, w) = x.dims4()?;
        if channels != self.channels {
            return Err(Error::shape(&[batch_size, self.channels, h, w], &x.shape));
        }
        let spatial = h * w;
        let count = (batch_size * spatial) as f32;
        let input = x.to_host(&self.backend);
        let channel_values = |c: usize| {
            (0..batch_size).flat_map(move |n| {
                let start = (n * channels + c) * spatial;
                start..start + spatial
            })
        };

        let batch_stats = pass.mode == Mode::Train;
        let (mean, var) = if batch_stats {
            let mut mean = vec![0.0f32; channels];
            let mut var = vec![0.0f32; channels];
            for c in 0..channels {
                mean[c] = channel_values(c).map(|i| input[i]).sum::<f32>() / count;
                var[c] = channel_values(c).map(|i| (input[i] - mean[c]).powi(2)).sum::<f32>() / count;
            }
            // running variance tracks the unbiased estimate
            let unbias = if count > 1.0 { count / (count - 1.0) } else { 1.0 };
            for c in 0..channels {
                self.running_mean[c] = (1.0 - self.momentum) * self.running_mean[c] + self.momentum * mean[c];
                self.running_var[c] = (1.0 - self.momentum) * self.running_var[c] + self.momentum * var[c] * unbias;
            }
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let gamma = self.gamma.to_host(&self.backend);
        let beta = self.beta.to_host(&self.backend);
        let inv_std: Vec<f32> = var.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
        let mut x_hat = vec![0.0f32; input.len()];
        let mut output = vec![0.0f32; input.len()];
        for c in 0..channels {
            for i in channel_values(c) {
                x_hat[i] = (input[i] - mean[c]) * inv_std[c];
                output[i] = gamma[c] * x_hat[i] + beta[c];
            }
        }

        if pass.record {
            self.cache = Some(NormCache {
                x_hat,
                inv_std,
                shape: x.shape.clone(),
                batch_stats,
            });
        }
        Ok(Tensor::from_buf(self.backend.upload(&output), &x.shape))
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        let cache = self.cache.take().ok_or(Error::MissingForward("batchnorm2d"))?;
        check_dy(&dy.shape, &cache.shape)?;
        let (batch_size, channels, spatial) = (cache.shape[0], cache.shape[1], cache.shape[2] * cache.shape[3]);
        let count = (batch_size * spatial) as f32;
        let dy_host = dy.to_host(&self.backend);
        let gamma = self.gamma.to_host(&self.backend);
        let mut dgamma = self.dgamma.to_host(&self.backend);
        let mut dbeta = self.dbeta.to_host(&self.backend);
        let mut dx = vec![0.0f32; dy_host.len()];

        for c in 0..channels {
            let indices = || {
                (0..batch_size).flat_map(move |n| {
                    let start = (n * channels + c) * spatial;
                    start..start + spatial
                })
            };
            let sum_dy: f32 = indices().map(|i| dy_host[i]).sum();
            let sum_dy_xhat: f32 = indices().map(|i| dy_host[i] * cache.x_hat[i]).sum();
            dbeta[c] += sum_dy;
            dgamma[c] += sum_dy_xhat;

            let scale = gamma[c] * cache.inv_std[c];
            for i in indices() {
                dx[i] = if cache.batch_stats {
                    scale / count * (count * dy_host[i] - sum_dy - cache.x_hat[i] * sum_dy_xhat)
                } else {
                    scale * dy_host[i]
                };
            }
        }

        self.dgamma.write_host(&self.backend, &dgamma)?;
        self.dbeta.write_host(&self.backend, &dbeta)?;
        Ok(Tensor::from_buf(self.backend.upload(&dx), &cache.shape))
    }

    fn params(&mut self) -> Vec<Param<'_, B>> {
        vec![
            Param { name: "batchnorm2d.weight", value: &mut self.gamma, grad: &mut self.dgamma },
            Param { name: "batchnorm2d.bias", value: &mut self.beta, grad: &mut self.dbeta },
        ]
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }
}

enum DropoutCache {
    Identity,
    Mask(Vec<f32>),
}

/// Inverted dropout: kept activations are scaled by `1 / (1 - p)` in Train
/// mode so Eval mode can pass inputs through untouched.
pub struct Dropout<B: Backend> {
    p: f32,
    rng: StdRng,
    cache: Option<DropoutCache>,
    backend: B,
}

impl<B: Backend + Clone> Dropout<B> {
    pub fn new(backend: B, p: f32, rng: &mut dyn RngCore) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::InvalidConfig(format!("dropout probability {p} is outside [0, 1)")));
        }
        Ok(Self {
            p,
            rng: StdRng::seed_from_u64(rng.next_u64()),
            cache: None,
            backend,
        })
    }

    pub fn p(&self) -> f32 {
        self.p
    }
}

impl<B: Backend + Clone> Layer<B> for Dropout<B> {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn forward(&mut self, x: &Tensor<B>, pass: Pass) -> Result<Tensor<B>> {
        match pass.mode {
            Mode::Eval => {
                if pass.record {
                    self.cache = Some(DropoutCache::Identity);
                }
                Ok(x.clone())
            }
            Mode::Train => {
                let scale = 1.0 / (1.0 - self.p);
                let mask: Vec<f32> = (0..x.len())
                    .map(|_| if self.rng.gen::<f32>() >= self.p { scale } else { 0.0 })
                    .collect();
                let output: Vec<f32> = x.to_host(&self.backend).iter().zip(&mask).map(|(v, m)| v * m).collect();
                if pass.record {
                    self.cache = Some(DropoutCache::Mask(mask));
                }
                Ok(Tensor::from_buf(self.backend.upload(&output), &x.shape))
            }
        }
    }

    fn backward(&mut self, dy: &Tensor<B>) -> Result<Tensor<B>> {
        match self.cache.take().ok_or(Error::MissingForward("dropout"))? {
            DropoutCache::Identity => Ok(dy.clone()),
            DropoutCache::Mask(mask) => {
                if mask.len() != dy.len() {
                    return Err(Error::shape(&[mask.len()], &[dy.len()]));
                }
                let dx: Vec<f32> = dy.to_host(&self.backend).iter().zip(&mask).map(|(g, m)| g * m).collect();
                Ok(Tensor::from_buf(self.backend.upload(&dx), &dy.shape))
            }
        }
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }
}
