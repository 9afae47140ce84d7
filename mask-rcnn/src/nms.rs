//! Greedy non-maximum suppression.

use crate::{boxes::BoxArray, common::*};

#[derive(Debug, Clone)]
pub struct NonMaxSuppressionInit {
    pub iou_threshold: R64,
    pub max_output: Option<usize>,
}

impl Default for NonMaxSuppressionInit {
    fn default() -> Self {
        Self {
            iou_threshold: r64(0.5),
            max_output: None,
        }
    }
}

impl NonMaxSuppressionInit {
    pub fn build(self) -> Result<NonMaxSuppression> {
        let Self {
            iou_threshold,
            max_output,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&iou_threshold.raw()),
            "iou_threshold must be in range [0, 1]"
        );

        Ok(NonMaxSuppression {
            iou_threshold: iou_threshold.raw() as f32,
            max_output: max_output.unwrap_or(usize::MAX),
        })
    }
}

#[derive(Debug, Clone, CopyGetters)]
pub struct NonMaxSuppression {
    #[get_copy = "pub"]
    iou_threshold: f32,
    #[get_copy = "pub"]
    max_output: usize,
}

impl NonMaxSuppression {
    pub fn forward(&self, boxes: &BoxArray, scores: ArrayView1<'_, f32>) -> Result<Vec<usize>> {
        non_max_suppression(boxes, scores, self.iou_threshold, self.max_output)
    }
}

/// Run greedy NMS and return the kept indices in descending score order.
///
/// Candidates are visited from the highest score down, with ties resolved
/// in favor of the lower index. Boxes with NaN scores are never kept. A
/// candidate is dropped when its IoU with a kept box is strictly greater than
/// `iou_threshold`. At most `max_output` indices are returned.
pub fn non_max_suppression(
    boxes: &BoxArray,
    scores: ArrayView1<'_, f32>,
    iou_threshold: f32,
    max_output: usize,
) -> Result<Vec<usize>> {
    ensure!(
        boxes.len() == scores.len(),
        "the number of boxes ({}) and scores ({}) mismatch",
        boxes.len(),
        scores.len()
    );

    let rects: Vec<_> = boxes.rects().collect();
    let order = argsort_descending(scores);
    let mut keep: Vec<usize> = vec![];

    for index in order {
        if keep.len() >= max_output {
            break;
        }

        let rect = &rects[index];
        let suppressed = keep
            .iter()
            .any(|&kept| rects[kept].iou_with(rect) > iou_threshold);

        if !suppressed {
            keep.push(index);
        }
    }

    Ok(keep)
}

/// Indices of the non-NaN scores sorted from high to low. The sort is stable.
pub(crate) fn argsort_descending(scores: ArrayView1<'_, f32>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len())
        .filter(|&index| !scores[index].is_nan())
        .collect();
    order.sort_by(|&lhs, &rhs| scores[rhs].total_cmp(&scores[lhs]));
    order
}
