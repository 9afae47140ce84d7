use super::misc::{huber, ratio_or_placeholder, softmax_cross_entropy};
use crate::{common::*, utils};

/// Classification and box regression loss of the second stage.
#[derive(Debug, Clone, Default)]
pub struct FastRcnnLoss;

#[derive(Debug, Clone, PartialEq)]
pub struct FastRcnnLossOutput {
    pub label_loss: f32,
    pub box_loss: f32,
    pub accuracy: f32,
    pub fg_accuracy: f32,
    pub false_negative: f32,
}

impl FastRcnnLoss {
    pub fn new() -> Self {
        Self
    }

    /// Compute the losses of the sampled ROIs.
    ///
    /// `labels` is `[n]` with `0` for background, `label_logits` is `[n, C]`.
    /// The foreground rows, in the order they appear in `labels`, align with
    /// `fg_box_targets` `[nfg, 4]` and `fg_box_logits` `[nfg, C - 1, 4]`.
    pub fn forward(
        &self,
        labels: ArrayView1<'_, i64>,
        label_logits: ArrayView2<'_, f32>,
        fg_box_targets: ArrayView2<'_, f32>,
        fg_box_logits: ArrayView3<'_, f32>,
    ) -> Result<FastRcnnLossOutput> {
        let num_rois = labels.len();
        let num_classes = label_logits.ncols();
        ensure!(
            label_logits.nrows() == num_rois,
            "the number of labels ({}) and label logits ({}) mismatch",
            num_rois,
            label_logits.nrows()
        );
        ensure!(
            labels
                .iter()
                .all(|&label| label >= 0 && (label as usize) < num_classes),
            "labels must be in range [0, {})",
            num_classes
        );

        let fg_indexes: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label > 0)
            .map(|(index, _)| index)
            .collect();
        let num_fg = fg_indexes.len();
        ensure!(
            fg_box_targets.dim() == (num_fg, 4),
            "expect [{}, 4] box targets, but get {:?}",
            num_fg,
            fg_box_targets.shape()
        );
        ensure!(
            fg_box_logits.dim() == (num_fg, num_classes.saturating_sub(1), 4),
            "expect [{}, {}, 4] box logits, but get {:?}",
            num_fg,
            num_classes.saturating_sub(1),
            fg_box_logits.shape()
        );

        if num_rois == 0 {
            return Ok(FastRcnnLossOutput {
                label_loss: 0.0,
                box_loss: 0.0,
                accuracy: 0.0,
                fg_accuracy: ratio_or_placeholder(0, 0),
                false_negative: ratio_or_placeholder(0, 0),
            });
        }

        let label_loss = izip!(&labels, label_logits.rows())
            .map(|(&label, logits)| softmax_cross_entropy(logits, label as usize) as f64)
            .sum::<f64>()
            / num_rois as f64;

        let predictions: Vec<Option<usize>> = label_logits.rows().into_iter().map(utils::argmax).collect();
        let correct: Vec<bool> = izip!(&predictions, &labels)
            .map(|(prediction, &label)| *prediction == Some(label as usize))
            .collect();
        let accuracy = correct.iter().filter(|&&hit| hit).count() as f32 / num_rois as f32;

        let fg_hits = fg_indexes.iter().filter(|&&index| correct[index]).count();
        let fg_zeros = fg_indexes
            .iter()
            .filter(|&&index| predictions[index] == Some(0))
            .count();

        // pick the regression of the labeled class
        let box_loss = izip!(&fg_indexes, fg_box_targets.rows())
            .enumerate()
            .map(|(fg_index, (&roi_index, target))| {
                let category = labels[roi_index] as usize - 1;
                let logits = fg_box_logits.slice(s![fg_index, category, ..]);
                izip!(target, logits)
                    .map(|(&target, &logit)| huber(logit, target, 1.0))
                    .sum::<f32>() as f64
            })
            .sum::<f64>()
            / num_rois as f64;

        Ok(FastRcnnLossOutput {
            label_loss: label_loss as f32,
            box_loss: box_loss as f32,
            accuracy,
            fg_accuracy: ratio_or_placeholder(fg_hits, num_fg),
            false_negative: ratio_or_placeholder(fg_zeros, num_fg),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn label_and_box_loss() -> Result<()> {
        let loss = FastRcnnLoss::new();
        let labels = array![2, 0, 1, 0];
        let label_logits = array![
            [0.0, 0.0, 10.0],
            [10.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 0.0]
        ];
        let fg_box_targets = array![[1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 3.0]];
        let mut fg_box_logits = Array3::zeros((2, 2, 4));
        // wrong-class regressions are ignored
        fg_box_logits[(0, 0, 0)] = 100.0;
        fg_box_logits[(1, 1, 3)] = 100.0;

        let output = loss.forward(
            labels.view(),
            label_logits.view(),
            fg_box_targets.view(),
            fg_box_logits.view(),
        )?;

        // huber(1) = 0.5, huber(3) = 2.5
        assert_abs_diff_eq!(output.box_loss, 3.0 / 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(output.accuracy, 0.75);
        assert_abs_diff_eq!(output.fg_accuracy, 0.5);
        assert_abs_diff_eq!(output.false_negative, 0.5);

        let expect = (2.0 * (2.0 + 10f32.exp()).ln() - 2.0 * 10.0 + 3f32.ln() + (2.0 + 10f32.exp()).ln())
            / 4.0;
        assert_abs_diff_eq!(output.label_loss, expect, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn background_only_batch() -> Result<()> {
        let loss = FastRcnnLoss::new();
        let labels = array![0, 0];
        let label_logits = array![[5.0, 0.0], [5.0, 0.0]];
        let output = loss.forward(
            labels.view(),
            label_logits.view(),
            Array2::zeros((0, 4)).view(),
            Array3::zeros((0, 1, 4)).view(),
        )?;
        assert_eq!(output.box_loss, 0.0);
        assert_abs_diff_eq!(output.accuracy, 1.0);
        assert_eq!(output.fg_accuracy, 0.5);
        Ok(())
    }

    #[test]
    fn misaligned_foreground_is_rejected() {
        let loss = FastRcnnLoss::new();
        let labels = array![1];
        let label_logits = array![[0.0, 1.0]];
        let result = loss.forward(
            labels.view(),
            label_logits.view(),
            Array2::zeros((2, 4)).view(),
            Array3::zeros((2, 1, 4)).view(),
        );
        assert!(result.is_err());
    }
}
