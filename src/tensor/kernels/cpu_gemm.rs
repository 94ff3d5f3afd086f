use crate::tensor::kernels::GemmParams;

/// General Matrix Multiply (GEMM) on host memory: `c = a @ b`
///
/// # Arguments
/// * `params` - Row-major operands with validated shapes `[m, k]` and `[k, n]`
/// * `c_data` - Output buffer of `m * n` floats, overwritten
pub(crate) fn gemm_core(params: GemmParams, c_data: &mut [f32]) {
    let [m, k] = params.a_shape;
    let n = params.b_shape[1];
    debug_assert_eq!(params.b_shape[0], k, "Inner dimension mismatch");
    debug_assert_eq!(c_data.len(), m * n, "Output buffer size mismatch");

    // Row-major strides: A is [m x k], B is [k x n]
    let (a_row_stride, b_row_stride) = (k, n);

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for p in 0..k {
                sum += params.a_data[i * a_row_stride + p] * params.b_data[p * b_row_stride + j];
            }
            c_data[i * n + j] = sum;
        }
    }
}

/// Performs matrix multiplication: C = A @ B
///
/// # Returns
/// * Flattened result matrix C with shape `[a_shape[0], b_shape[1]]`
pub(crate) fn matmul(
    a_data: &[f32],
    a_shape: [usize; 2],
    b_data: &[f32],
    b_shape: [usize; 2],
) -> Vec<f32> {
    let params = GemmParams {
        a_data,
        a_shape,
        b_data,
        b_shape,
    };
    let [m, n] = params.out_shape();
    let mut result = vec![0.0; m * n];
    gemm_core(params, &mut result);
    result
}
