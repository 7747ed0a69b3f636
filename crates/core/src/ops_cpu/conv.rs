/// Geometry of one im2col/col2im call: input `(n, c, h, w)`, kernel, padding,
/// stride and the resulting output plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub input: (usize, usize, usize, usize),
    pub kernel: (usize, usize),
    pub padding: (usize, usize),
    pub stride: (usize, usize),
    pub output: (usize, usize),
}

impl ConvGeometry {
    /// Rows of the column matrix: `c * kh * kw`.
    pub fn col_rows(&self) -> usize {
        self.input.1 * self.kernel.0 * self.kernel.1
    }

    /// Columns of the column matrix: `n * oh * ow`.
    pub fn col_cols(&self) -> usize {
        self.input.0 * self.output.0 * self.output.1
    }

    fn source(&self, out_y: usize, out_x: usize, kernel_y: usize, kernel_x: usize) -> Option<(usize, usize)> {
        let (_, _, h, w) = self.input;
        let in_y = (out_y * self.stride.0 + kernel_y) as isize - self.padding.0 as isize;
        let in_x = (out_x * self.stride.1 + kernel_x) as isize - self.padding.1 as isize;
        if in_y >= 0 && (in_y as usize) < h && in_x >= 0 && (in_x as usize) < w {
            Some((in_y as usize, in_x as usize))
        } else {
            None
        }
    }
}

pub fn im2col(input: &[f32], output: &mut [f32], geo: &ConvGeometry) {
    let (n, c, h, w) = geo.input;
    let (kernel_h, kernel_w) = geo.kernel;
    let (output_h, output_w) = geo.output;
    let col_cols = geo.col_cols();

    for batch_idx in 0..n {
        for out_y in 0..output_h {
            for out_x in 0..output_w {
                let col_idx = batch_idx * (output_h * output_w) + out_y * output_w + out_x;
                for c_idx in 0..c {
                    for kernel_y in 0..kernel_h {
                        for kernel_x in 0..kernel_w {
                            let row_idx = c_idx * (kernel_h * kernel_w) + kernel_y * kernel_w + kernel_x;
                            output[row_idx * col_cols + col_idx] =
                                match geo.source(out_y, out_x, kernel_y, kernel_x) {
                                    Some((in_y, in_x)) => {
                                        input[batch_idx * (c * h * w) + c_idx * (h * w) + in_y * w + in_x]
                                    }
                                    None => 0.0,
                                };
                        }
                    }
                }
            }
        }
    }
}

/// Adjoint of [`im2col`]: scatters column gradients back onto the input,
/// accumulating where receptive fields overlap. `output` must start zeroed.
pub fn col2im(cols: &[f32], output: &mut [f32], geo: &ConvGeometry) {
    let (n, c, h, w) = geo.input;
    let (kernel_h, kernel_w) = geo.kernel;
    let (output_h, output_w) = geo.output;
    let col_cols = geo.col_cols();

    for batch_idx in 0..n {
        for out_y in 0..output_h {
            for out_x in 0..output_w {
                let col_idx = batch_idx * (output_h * output_w) + out_y * output_w + out_x;
                for c_idx in 0..c {
                    for kernel_y in 0..kernel_h {
                        for kernel_x in 0..kernel_w {
                            if let Some((in_y, in_x)) = geo.source(out_y, out_x, kernel_y, kernel_x) {
                                let row_idx = c_idx * (kernel_h * kernel_w) + kernel_y * kernel_w + kernel_x;
                                output[batch_idx * (c * h * w) + c_idx * (h * w) + in_y * w + in_x] +=
                                    cols[row_idx * col_cols + col_idx];
                            }
                        }
                    }
                }
            }
        }
    }
}
