//! Spatial bookkeeping between convolution/pool stages and the first dense
//! layer. Everything here is a pure function of the configured geometry.

use crate::error::{Error, Result};

/// One spatial stage of a convolutional feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Conv {
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    },
    Pool {
        kernel: (usize, usize),
        stride: (usize, usize),
    },
}

/// Output plane of a convolution: `(in + 2p - k) / s + 1` per axis.
pub fn conv2d_output(
    input: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<(usize, usize)> {
    let h = window_output(input.0 + 2 * padding.0, kernel.0, stride.0);
    let w = window_output(input.1 + 2 * padding.1, kernel.1, stride.1);
    match (h, w) {
        (Some(h), Some(w)) => Ok((h, w)),
        _ => Err(Error::InvalidConfig(format!(
            "{}x{} kernel (padding {:?}) does not fit a {}x{} plane",
            kernel.0, kernel.1, padding, input.0, input.1
        ))),
    }
}

/// Output plane of an unpadded pool window (floor division, like the kernels).
pub fn pool2d_output(
    input: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
) -> Result<(usize, usize)> {
    match (
        window_output(input.0, kernel.0, stride.0),
        window_output(input.1, kernel.1, stride.1),
    ) {
        (Some(h), Some(w)) => Ok((h, w)),
        _ => Err(Error::InvalidConfig(format!(
            "{}x{} pool window does not fit a {}x{} plane",
            kernel.0, kernel.1, input.0, input.1
        ))),
    }
}

fn window_output(extent: usize, kernel: usize, stride: usize) -> Option<usize> {
    if kernel == 0 || stride == 0 || extent < kernel {
        return None;
    }
    Some((extent - kernel) / stride + 1)
}

/// Walks `stages` from `(channels, input)` and returns the final
/// `(channels, height, width)`.
pub fn trace_stages(
    input: (usize, usize),
    channels: usize,
    stages: &[Stage],
) -> Result<(usize, usize, usize)> {
    stages
        .iter()
        .try_fold((channels, input.0, input.1), |(c, h, w), stage| match *stage {
            Stage::Conv {
                out_channels,
                kernel,
                stride,
                padding,
            } => {
                let (h, w) = conv2d_output((h, w), kernel, stride, padding)?;
                Ok((out_channels, h, w))
            }
            Stage::Pool { kernel, stride } => {
                let (h, w) = pool2d_output((h, w), kernel, stride)?;
                Ok((c, h, w))
            }
        })
}

/// Width of the flattened feature vector after `stages`.
pub fn flattened_features(input: (usize, usize), channels: usize, stages: &[Stage]) -> Result<usize> {
    let (c, h, w) = trace_stages(input, channels, stages)?;
    Ok(c * h * w)
}
