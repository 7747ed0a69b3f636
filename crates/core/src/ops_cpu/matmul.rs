/// C = alpha * A * B + beta * C, with A `m x k`, B `k x n`, C `m x n`, all row-major.
#[allow(clippy::too_many_arguments)]
pub fn naive_gemm(
    a: &[f32], b: &[f32], c: &mut [f32],
    m: usize, n: usize, k: usize,
    alpha: f32, beta: f32
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            c[i * n + j] = alpha * sum + beta * c[i * n + j];
        }
    }
}

pub fn add_bias(output: &mut [f32], bias: &[f32], m: usize, n: usize) {
    for i in 0..m {
        for j in 0..n {
            output[i * n + j] += bias[j];
        }
    }
}

/// Writes the `cols x rows` transpose of a row-major `rows x cols` matrix.
pub fn transpose(input: &[f32], output: &mut [f32], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            output[c * rows + r] = input[r * cols + c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemm_accumulates_with_beta() {
        // [1 2; 3 4] * [1 0; 0 1]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 0.0, 0.0, 1.0];
        let mut c = [1.0; 4];
        naive_gemm(&a, &b, &mut c, 2, 2, 2, 1.0, 1.0);
        assert_eq!(c, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn transpose_swaps_axes() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut t = [0.0; 6];
        transpose(&a, &mut t, 2, 3);
        assert_eq!(t, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
