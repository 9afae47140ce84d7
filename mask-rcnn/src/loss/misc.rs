use crate::{common::*, utils};

/// The value reported for a ratio metric whose denominator is zero.
pub const METRIC_PLACEHOLDER: f32 = 0.5;

/// Sigmoid cross entropy of a logit against a target in `[0, 1]`.
pub fn sigmoid_cross_entropy(logit: f32, target: f32) -> f32 {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

/// Softmax cross entropy of a logit row against a class index.
pub fn softmax_cross_entropy(logits: ArrayView1<'_, f32>, label: usize) -> f32 {
    utils::log_sum_exp(logits) - logits[label]
}

/// Huber loss, quadratic within `delta` and linear beyond.
pub fn huber(input: f32, target: f32, delta: f32) -> f32 {
    let diff = (input - target).abs();
    if diff <= delta {
        0.5 * diff * diff
    } else {
        delta * (diff - 0.5 * delta)
    }
}

/// `numer / denom`, or the placeholder if `denom` is zero.
pub fn ratio_or_placeholder(numer: usize, denom: usize) -> f32 {
    if denom == 0 {
        METRIC_PLACEHOLDER
    } else {
        numer as f32 / denom as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn sigmoid_cross_entropy_values() {
        assert_abs_diff_eq!(sigmoid_cross_entropy(0.0, 1.0), 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(sigmoid_cross_entropy(0.0, 0.0), 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(sigmoid_cross_entropy(100.0, 1.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sigmoid_cross_entropy(100.0, 0.0), 100.0, epsilon = 1e-4);
    }

    #[test]
    fn softmax_cross_entropy_values() {
        let logits = array![0.0, 0.0];
        assert_abs_diff_eq!(softmax_cross_entropy(logits.view(), 1), 2f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn huber_is_continuous_at_delta() {
        assert_abs_diff_eq!(huber(0.5, 0.0, 1.0), 0.125);
        assert_abs_diff_eq!(huber(3.0, 0.0, 1.0), 2.5);
        assert_abs_diff_eq!(huber(1.0, 0.0, 1.0), 0.5);
        let delta = 1.0 / 9.0;
        assert_abs_diff_eq!(huber(delta, 0.0, delta), 0.5 * delta * delta, epsilon = 1e-7);
    }
}
