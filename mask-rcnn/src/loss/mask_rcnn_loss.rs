use super::misc::sigmoid_cross_entropy;
use crate::{common::*, utils};

/// Per-pixel mask loss of the foreground ROIs.
#[derive(Debug, Clone, Default)]
pub struct MaskRcnnLoss;

#[derive(Debug, Clone, PartialEq)]
pub struct MaskRcnnLossOutput {
    pub loss: f32,
    pub accuracy: f32,
    pub pos_accuracy: f32,
    pub fg_pixel_ratio: f32,
}

impl MaskRcnnLoss {
    pub fn new() -> Self {
        Self
    }

    /// `mask_logits` is `[nfg, C - 1, h, w]`, `fg_labels` holds classes in
    /// `1..C` and `fg_target_masks` is `[nfg, h, w]` in `[0, 1]`.
    pub fn forward(
        &self,
        mask_logits: ArrayView4<'_, f32>,
        fg_labels: ArrayView1<'_, i64>,
        fg_target_masks: ArrayView3<'_, f32>,
    ) -> Result<MaskRcnnLossOutput> {
        let (num_fg, num_categories, height, width) = mask_logits.dim();
        ensure!(
            fg_labels.len() == num_fg && fg_target_masks.dim() == (num_fg, height, width),
            "mask logits {:?}, labels {:?} and targets {:?} are not aligned",
            mask_logits.shape(),
            fg_labels.shape(),
            fg_target_masks.shape()
        );
        ensure!(
            fg_labels
                .iter()
                .all(|&label| label >= 1 && label as usize <= num_categories),
            "foreground labels must be in range [1, {}]",
            num_categories
        );

        let num_pixels = num_fg * height * width;
        if num_pixels == 0 {
            return Ok(MaskRcnnLossOutput {
                loss: 0.0,
                accuracy: 0.0,
                pos_accuracy: 0.0,
                fg_pixel_ratio: 0.0,
            });
        }

        let mut loss = 0f64;
        let mut num_correct = 0;
        let mut num_pos_correct = 0;
        let mut num_fg_pixels = 0;

        for (fg_index, &label) in fg_labels.iter().enumerate() {
            let logits = mask_logits.slice(s![fg_index, label as usize - 1, .., ..]);
            let targets = fg_target_masks.slice(s![fg_index, .., ..]);

            for (&logit, &target) in izip!(&logits, &targets) {
                loss += sigmoid_cross_entropy(logit, target) as f64;

                let predicted = utils::sigmoid(logit) > 0.5;
                let truth = target > 0.5;
                if predicted == truth {
                    num_correct += 1;
                    if truth {
                        num_pos_correct += 1;
                    }
                }
                if truth {
                    num_fg_pixels += 1;
                }
            }
        }

        let loss = (loss / num_pixels as f64) as f32;
        let num_pixels = num_pixels as f32;
        Ok(MaskRcnnLossOutput {
            loss,
            accuracy: num_correct as f32 / num_pixels,
            pos_accuracy: num_pos_correct as f32 / num_pixels,
            fg_pixel_ratio: num_fg_pixels as f32 / num_pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn loss_uses_the_labeled_mask() -> Result<()> {
        let loss = MaskRcnnLoss::new();
        let mut logits = Array4::zeros((1, 2, 2, 2));
        // category 1 predicts the target perfectly, category 0 is ignored
        logits
            .slice_mut(s![0, 1, .., ..])
            .assign(&array![[50.0, -50.0], [-50.0, -50.0]]);
        logits.slice_mut(s![0, 0, .., ..]).fill(-50.0);
        let targets = array![[[1.0, 0.0], [0.0, 0.0]]];

        let output = loss.forward(logits.view(), array![2].view(), targets.view())?;
        assert_abs_diff_eq!(output.loss, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(output.accuracy, 1.0);
        assert_abs_diff_eq!(output.pos_accuracy, 0.25);
        assert_abs_diff_eq!(output.fg_pixel_ratio, 0.25);
        Ok(())
    }

    #[test]
    fn uninformative_logits() -> Result<()> {
        let loss = MaskRcnnLoss::new();
        let logits = Array4::zeros((2, 1, 3, 3));
        let targets = Array3::from_elem((2, 3, 3), 1.0);
        let output = loss.forward(logits.view(), array![1, 1].view(), targets.view())?;
        assert_abs_diff_eq!(output.loss, 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(output.accuracy, 0.0);
        assert_abs_diff_eq!(output.fg_pixel_ratio, 1.0);
        Ok(())
    }

    #[test]
    fn loss_over_many_pixels_stays_accurate() -> Result<()> {
        let loss = MaskRcnnLoss::new();
        let logits = Array4::zeros((128, 1, 28, 28));
        let mut targets = Array3::zeros((128, 28, 28));
        targets.slice_mut(s![.., 7..21, 7..21]).fill(1.0);
        let labels = Array1::from_elem(128, 1);
        let output = loss.forward(logits.view(), labels.view(), targets.view())?;
        assert_abs_diff_eq!(output.loss, 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(output.fg_pixel_ratio, 0.25);
        Ok(())
    }

    #[test]
    fn empty_and_invalid_inputs() -> Result<()> {
        let loss = MaskRcnnLoss::new();
        let output = loss.forward(
            Array4::zeros((0, 80, 28, 28)).view(),
            Array1::zeros(0).view(),
            Array3::zeros((0, 28, 28)).view(),
        )?;
        assert_eq!(output.loss, 0.0);

        let result = loss.forward(
            Array4::zeros((1, 2, 2, 2)).view(),
            array![3].view(),
            Array3::zeros((1, 2, 2)).view(),
        );
        assert!(result.is_err());
        Ok(())
    }
}
