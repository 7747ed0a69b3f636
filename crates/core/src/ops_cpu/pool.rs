/// 2D max pooling over `(n, c, h, w)` input. `indices` receives, per output
/// element, the flat input index that won the max.
pub fn maxpool2d_forward(
    input: &[f32], output: &mut [f32], indices: &mut [usize],
    input_dims: (usize, usize, usize, usize),
    kernel_size: (usize, usize),
    stride: (usize, usize),
) {
    let (n, c, h, w) = input_dims;
    let (kernel_h, kernel_w) = kernel_size;
    let (stride_h, stride_w) = stride;

    let output_h = (h - kernel_h) / stride_h + 1;
    let output_w = (w - kernel_w) / stride_w + 1;

    for batch_idx in 0..n {
        for c_idx in 0..c {
            let plane = batch_idx * (c * h * w) + c_idx * (h * w);
            for out_y in 0..output_h {
                for out_x in 0..output_w {
                    let start_y = out_y * stride_h;
                    let start_x = out_x * stride_w;

                    let mut max_val = f32::NEG_INFINITY;
                    let mut max_idx = plane + start_y * w + start_x;

                    for ky in 0..kernel_h {
                        for kx in 0..kernel_w {
                            let input_idx = plane + (start_y + ky) * w + (start_x + kx);
                            if input[input_idx] > max_val {
                                max_val = input[input_idx];
                                max_idx = input_idx;
                            }
                        }
                    }

                    let output_idx = batch_idx * (c * output_h * output_w)
                        + c_idx * (output_h * output_w)
                        + out_y * output_w
                        + out_x;
                    output[output_idx] = max_val;
                    indices[output_idx] = max_idx;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_odd_extents_and_records_argmax() {
        #[rustfmt::skip]
        let input = [
            1.0, 9.0, 2.0,
            3.0, 4.0, 8.0,
            7.0, 6.0, 5.0,
        ];
        let mut out = [0.0];
        let mut idx = [0];
        maxpool2d_forward(&input, &mut out, &mut idx, (1, 1, 3, 3), (2, 2), (2, 2));
        assert_eq!(out, [9.0]);
        assert_eq!(idx, [1]);
    }
}
