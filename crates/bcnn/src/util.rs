//! # Shared helpers.

use bimm_contracts::unpack_shape_contract;
use burn::nn::Initializer;

/// Variance-scaling initializer for convolutions that feed rectifiers.
///
/// ``KaimingNormal`` over the fan-out, with the rectifier gain ``sqrt(2)``.
/// Paired with unit-scale / zero-bias normalization layers, this keeps the
/// early-training activation variance stable across deep stacks.
pub fn rectifier_conv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: true,
    }
}

/// Get the output resolution for a given input resolution.
///
/// The input must be a multiple of the stride.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    unpack_shape_contract!(
        [
            "height_in" = "height_out" * "stride",
            "width_in" = "width_out" * "stride"
        ],
        &input_resolution,
        &["height_out", "width_out"],
        &[("stride", stride)]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_div_output_resolution() {
        assert_eq!(stride_div_output_resolution([32, 32], 1), [32, 32]);
        assert_eq!(stride_div_output_resolution([32, 32], 2), [16, 16]);
        assert_eq!(stride_div_output_resolution([8, 16], 4), [2, 4]);
    }

    #[test]
    #[should_panic(expected = "7 !~ height_in=(height_out*stride)")]
    fn test_stride_div_output_resolution_panics() {
        stride_div_output_resolution([7, 8], 2);
    }

    #[test]
    fn test_rectifier_conv_initializer() {
        assert!(matches!(
            rectifier_conv_initializer(),
            Initializer::KaimingNormal {
                fan_out_only: true,
                ..
            }
        ));
    }
}
