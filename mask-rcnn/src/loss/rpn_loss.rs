use super::misc::{huber, ratio_or_placeholder, sigmoid_cross_entropy};
use crate::{common::*, utils};

/// The probability thresholds at which RPN precision and recall are reported.
pub const RPN_METRIC_THRESHOLDS: [f32; 3] = [0.5, 0.2, 0.1];

const RPN_BOX_LOSS_DELTA: f32 = 1.0 / 9.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpnLossInit {
    pub batch_per_image: usize,
}

impl Default for RpnLossInit {
    fn default() -> Self {
        Self {
            batch_per_image: 256,
        }
    }
}

impl RpnLossInit {
    pub fn build(self) -> Result<RpnLoss> {
        let Self { batch_per_image } = self;
        ensure!(batch_per_image > 0, "batch_per_image must be positive");
        Ok(RpnLoss { batch_per_image })
    }
}

#[derive(Debug, Clone)]
pub struct RpnLoss {
    batch_per_image: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdMetrics {
    pub thresh: f32,
    pub precision: f32,
    pub recall: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpnLossOutput {
    pub label_loss: f32,
    pub box_loss: f32,
    pub num_valid: usize,
    pub num_pos: usize,
    pub metrics: Vec<ThresholdMetrics>,
}

impl RpnLoss {
    /// Compute the objectness and box losses over all anchors.
    ///
    /// `anchor_labels` are in `{-1, 0, 1}`, `anchor_boxes` are the encoded
    /// targets, both aligned with the logits.
    pub fn forward(
        &self,
        anchor_labels: ArrayView1<'_, i64>,
        anchor_boxes: ArrayView2<'_, f32>,
        label_logits: ArrayView1<'_, f32>,
        box_logits: ArrayView2<'_, f32>,
    ) -> Result<RpnLossOutput> {
        let num_anchors = anchor_labels.len();
        ensure!(
            label_logits.len() == num_anchors
                && anchor_boxes.dim() == (num_anchors, 4)
                && box_logits.dim() == (num_anchors, 4),
            "RPN inputs must be aligned with {} anchors",
            num_anchors
        );
        ensure!(
            anchor_labels.iter().all(|label| (-1..=1).contains(label)),
            "anchor labels must be in {{-1, 0, 1}}"
        );

        let valid: Vec<(i64, f32)> = izip!(&anchor_labels, &label_logits)
            .filter(|(&label, _)| label != -1)
            .map(|(&label, &logit)| (label, logit))
            .collect();
        let num_valid = valid.len();
        let num_pos = valid.iter().filter(|(label, _)| *label == 1).count();

        let metrics = RPN_METRIC_THRESHOLDS
            .iter()
            .map(|&thresh| {
                let predicted: Vec<i64> = valid
                    .iter()
                    .filter(|(_, logit)| utils::sigmoid(*logit) > thresh)
                    .map(|(label, _)| *label)
                    .collect();
                let num_correct = predicted.iter().filter(|&&label| label == 1).count();

                ThresholdMetrics {
                    thresh,
                    precision: ratio_or_placeholder(num_correct, predicted.len()),
                    recall: ratio_or_placeholder(num_correct, num_pos),
                }
            })
            .collect();

        let normalizer = self.batch_per_image as f64;

        let label_loss = if num_valid == 0 {
            0.0
        } else {
            valid
                .iter()
                .map(|&(label, logit)| sigmoid_cross_entropy(logit, label as f32) as f64)
                .sum::<f64>()
                / normalizer
        };

        let box_loss = if num_pos == 0 {
            0.0
        } else {
            izip!(&anchor_labels, anchor_boxes.rows(), box_logits.rows())
                .filter(|(&label, _, _)| label == 1)
                .map(|(_, target, logit)| {
                    izip!(target, logit)
                        .map(|(&target, &logit)| huber(logit, target, RPN_BOX_LOSS_DELTA))
                        .sum::<f32>() as f64
                })
                .sum::<f64>()
                / RPN_BOX_LOSS_DELTA as f64
                / normalizer
        };

        debug!("RPN: {} valid and {} positive anchors", num_valid, num_pos);

        Ok(RpnLossOutput {
            label_loss: label_loss as f32,
            box_loss: box_loss as f32,
            num_valid,
            num_pos,
            metrics,
        })
    }
}
