//! # Convolution Shape Utilities
//!
//! Output-size arithmetic for the strided and dilated convolutions used by
//! residual blocks.

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to both sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let kernel_extent = 1 + dilation * (kernel_size - 1);

    if effective_size < kernel_extent {
        return None;
    }
    Some((effective_size - kernel_extent) / stride + 1)
}

/// Predict the output size of a 1D convolution operation.
///
/// This is the ``panic``-ing variant of [`maybe_conv1d_output_size`].
///
/// # Panics
///
/// If the output size would be <= 0.
pub fn expect_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> usize {
    match maybe_conv1d_output_size(input_size, kernel_size, stride, padding, dilation) {
        Some(x) => x,
        None => panic!(
            "No legal output size for conv1d with:\n input_size:{input_size}\n kernel_size:{kernel_size}\n stride:{stride}\n dilation:{dilation}\n padding:{padding}",
        ),
    }
}

/// The ``[before, after]`` padding which preserves resolution for a unit-stride conv.
///
/// ``total = dilation * (kernel_size - 1)``; `before` gets ``floor(total / 2)``
/// and `after` the remainder, so even kernels pad the bottom/right edge one
/// more than the top/left edge.
///
/// # Returns
///
/// `None` for a zero kernel size.
pub fn same_padding(
    kernel_size: usize,
    dilation: usize,
) -> Option<[usize; 2]> {
    if kernel_size == 0 {
        return None;
    }
    let total = dilation * (kernel_size - 1);
    Some([total / 2, total - total / 2])
}

/// Output resolution of an un-padded 1x1 conv with the given stride.
///
/// ``out = ceil(in / stride)``
pub fn strided_pointwise_resolution(
    input_resolution: [usize; 2],
    stride: [usize; 2],
) -> [usize; 2] {
    [
        expect_conv1d_output_size(input_resolution[0], 1, stride[0], 0, 1),
        expect_conv1d_output_size(input_resolution[1], 1, stride[1], 0, 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv1d_output_size() {
        assert_eq!(maybe_conv1d_output_size(56, 1, 2, 0, 1), Some(28));
        assert_eq!(maybe_conv1d_output_size(7, 1, 2, 0, 1), Some(4));
        assert_eq!(maybe_conv1d_output_size(28, 3, 1, 1, 1), Some(28));
        assert_eq!(maybe_conv1d_output_size(28, 3, 1, 2, 2), Some(28));
        assert_eq!(maybe_conv1d_output_size(224, 7, 2, 3, 1), Some(112));
        assert_eq!(maybe_conv1d_output_size(2, 5, 1, 0, 1), None);
    }

    #[test]
    #[should_panic(expected = "No legal output size for conv1d")]
    fn test_expect_conv1d_output_size_panics() {
        expect_conv1d_output_size(2, 5, 1, 0, 1);
    }

    #[test]
    fn test_same_padding() {
        assert_eq!(same_padding(1, 1), Some([0, 0]));
        assert_eq!(same_padding(3, 1), Some([1, 1]));
        assert_eq!(same_padding(3, 2), Some([2, 2]));
        assert_eq!(same_padding(5, 4), Some([8, 8]));
        assert_eq!(same_padding(2, 1), Some([0, 1]));
        assert_eq!(same_padding(4, 1), Some([1, 2]));
        assert_eq!(same_padding(2, 2), Some([1, 1]));
        assert_eq!(same_padding(0, 1), None);

        for (kernel_size, dilation) in [(2, 1), (3, 2), (4, 1), (4, 3), (6, 2)] {
            let [before, after] = same_padding(kernel_size, dilation).unwrap();
            assert_eq!(
                maybe_conv1d_output_size(9 + before + after, kernel_size, 1, 0, dilation),
                Some(9)
            );
        }
    }

    #[test]
    fn test_strided_pointwise_resolution() {
        assert_eq!(strided_pointwise_resolution([56, 56], [2, 2]), [28, 28]);
        assert_eq!(strided_pointwise_resolution([15, 8], [2, 1]), [8, 8]);
    }
}
