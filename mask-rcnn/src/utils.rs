use crate::common::*;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-wise softmax of a `[n, c]` logit array.
pub fn softmax_rows(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();
    probs.rows_mut().into_iter().for_each(|mut row| {
        let max = row.fold(f32::NEG_INFINITY, |max, &value| max.max(value));
        row.mapv_inplace(|value| (value - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|value| value / sum);
    });
    probs
}

/// `ln(sum(exp(x)))` computed without overflow.
pub fn log_sum_exp(values: ArrayView1<'_, f32>) -> f32 {
    let max = values.fold(f32::NEG_INFINITY, |max, &value| max.max(value));
    if !max.is_finite() {
        return max;
    }
    max + values.mapv(|value| (value - max).exp()).sum().ln()
}

/// Index of the first maximum. Returns `None` on empty input.
pub fn argmax(values: ArrayView1<'_, f32>) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, &value)| match best {
            Some((_, max)) if value <= max => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index)
}

/// Inverse of a permutation given as `perm[new_position] = old_position`.
pub fn invert_permutation(perm: &[usize]) -> Result<Vec<usize>> {
    let mut inverse = vec![usize::MAX; perm.len()];
    for (position, &index) in perm.iter().enumerate() {
        ensure!(
            index < perm.len() && inverse[index] == usize::MAX,
            "{:?} is not a permutation",
            perm
        );
        inverse[index] = position;
    }
    Ok(inverse)
}
