//! Final per-class filtering of second-stage predictions.

use crate::{box_coder::BoxCoder, boxes::BoxArray, common::*, nms, utils};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFilterInit {
    pub score_thresh: R64,
    pub nms_thresh: R64,
    pub results_per_image: usize,
}

impl Default for DetectionFilterInit {
    fn default() -> Self {
        Self {
            score_thresh: r64(0.05),
            nms_thresh: r64(0.5),
            results_per_image: 100,
        }
    }
}

impl DetectionFilterInit {
    pub fn build(self) -> Result<DetectionFilter> {
        let Self {
            score_thresh,
            nms_thresh,
            results_per_image,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&score_thresh.raw()),
            "score_thresh must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&nms_thresh.raw()),
            "nms_thresh must be in range [0, 1]"
        );
        ensure!(results_per_image > 0, "results_per_image must be positive");

        Ok(DetectionFilter {
            score_thresh: score_thresh.raw() as f32,
            nms_thresh: nms_thresh.raw() as f32,
            results_per_image,
        })
    }
}

/// A kept prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Foreground class id, starting from 1.
    pub class_id: usize,
    /// The row of the box in the input.
    pub box_index: usize,
    pub rect: XYXY<f32>,
    pub score: f32,
}

#[derive(Debug, Clone, CopyGetters)]
pub struct DetectionFilter {
    #[get_copy = "pub"]
    score_thresh: f32,
    #[get_copy = "pub"]
    nms_thresh: f32,
    #[get_copy = "pub"]
    results_per_image: usize,
}

impl DetectionFilter {
    /// Filter `[n, C - 1, 4]` per-class boxes by `[n, C]` class probabilities.
    ///
    /// Column 0 of `probs` is the background and is never reported. The
    /// output is sorted by descending score.
    pub fn forward(&self, boxes: ArrayView3<'_, f32>, probs: ArrayView2<'_, f32>) -> Result<Vec<Detection>> {
        let (num_boxes, num_fg_classes, num_coords) = boxes.dim();
        ensure!(num_coords == 4, "expect [n, C - 1, 4] boxes, but get {:?}", boxes.shape());
        ensure!(
            probs.nrows() == num_boxes && probs.ncols() == num_fg_classes + 1,
            "expect [{}, {}] probabilities, but get {:?}",
            num_boxes,
            num_fg_classes + 1,
            probs.shape()
        );

        let per_class: Vec<Vec<Detection>> = (0..num_fg_classes)
            .into_par_iter()
            .map(|category| self.filter_class(category, boxes, probs))
            .collect::<Result<_>>()?;

        let mut detections: Vec<Detection> = per_class.into_iter().flatten().collect();
        detections.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));
        detections.truncate(self.results_per_image);

        debug!("{} detections kept", detections.len());
        Ok(detections)
    }

    fn filter_class(
        &self,
        category: usize,
        boxes: ArrayView3<'_, f32>,
        probs: ArrayView2<'_, f32>,
    ) -> Result<Vec<Detection>> {
        let class_probs = probs.column(category + 1);
        let candidates: Vec<usize> = class_probs
            .iter()
            .enumerate()
            .filter(|(_, &prob)| prob > self.score_thresh)
            .map(|(index, _)| index)
            .collect();

        let class_boxes: BoxArray = boxes
            .slice(s![.., category, ..])
            .select(Axis(0), &candidates)
            .try_into()?;
        let class_scores = class_probs.select(Axis(0), &candidates);

        let mut keep = nms::non_max_suppression(
            &class_boxes,
            class_scores.view(),
            self.nms_thresh,
            self.results_per_image,
        )?;
        keep.sort_unstable();

        let detections = keep
            .into_iter()
            .map(|index| Detection {
                class_id: category + 1,
                box_index: candidates[index],
                rect: class_boxes.rect(index),
                score: class_scores[index],
            })
            .collect();
        Ok(detections)
    }

    /// Decode raw second-stage head outputs and filter them.
    ///
    /// `label_logits` is `[n, C]` and `box_logits` is `[n, C - 1, 4]`, both
    /// aligned with `proposals`. Decoded boxes are clipped to the window.
    pub fn from_head_outputs(
        &self,
        coder: &BoxCoder,
        proposals: &BoxArray,
        label_logits: ArrayView2<'_, f32>,
        box_logits: ArrayView3<'_, f32>,
        window: &HW<f32>,
    ) -> Result<Vec<Detection>> {
        let (num_boxes, num_fg_classes, _) = box_logits.dim();
        ensure!(
            num_boxes == proposals.len(),
            "the number of box logits ({}) and proposals ({}) mismatch",
            num_boxes,
            proposals.len()
        );

        let probs = utils::softmax_rows(label_logits);
        let mut boxes = Array3::zeros((num_boxes, num_fg_classes, 4));
        for category in 0..num_fg_classes {
            let decoded = coder
                .decode(box_logits.slice(s![.., category, ..]), proposals)?
                .clip(window);
            boxes
                .slice_mut(s![.., category, ..])
                .assign(decoded.array());
        }

        self.forward(boxes.view(), probs.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn single_class_nms() -> Result<()> {
        let filter = DetectionFilterInit {
            score_thresh: r64(0.05),
            nms_thresh: r64(0.5),
            results_per_image: 100,
        }
        .build()?;

        let boxes = array![
            [[0.0, 0.0, 10.0, 10.0]],
            [[1.0, 1.0, 11.0, 11.0]],
            [[50.0, 50.0, 60.0, 60.0]]
        ];
        let probs = array![[0.1, 0.9], [0.2, 0.8], [0.05, 0.95]];

        let detections = filter.forward(boxes.view(), probs.view())?;
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].box_index, 2);
        assert_eq!(detections[1].box_index, 0);
        assert!(detections.iter().all(|det| det.class_id == 1));
        assert_eq!(detections[1].rect.xyxy(), [0.0, 0.0, 10.0, 10.0]);
        Ok(())
    }

    #[test]
    fn global_top_k_across_classes() -> Result<()> {
        let filter = DetectionFilterInit {
            score_thresh: r64(0.1),
            nms_thresh: r64(0.5),
            results_per_image: 2,
        }
        .build()?;

        let boxes = array![
            [
                [0.0, 0.0, 10.0, 10.0],
                [0.0, 0.0, 10.0, 10.0],
                [0.0, 0.0, 10.0, 10.0]
            ],
            [
                [0.0, 0.0, 10.0, 10.0],
                [0.0, 0.0, 10.0, 10.0],
                [20.0, 20.0, 30.0, 30.0]
            ]
        ];
        let probs = array![[0.0, 0.3, 0.45, 0.25], [0.1, 0.05, 0.35, 0.5]];

        let detections = filter.forward(boxes.view(), probs.view())?;
        let summary: Vec<_> = detections
            .iter()
            .map(|det| (det.class_id, det.box_index))
            .collect();
        assert_eq!(summary, vec![(3, 1), (2, 0)]);
        assert_abs_diff_eq!(detections[0].score, 0.5);
        Ok(())
    }

    #[test]
    fn threshold_is_exclusive_and_empty_input_is_legal() -> Result<()> {
        let filter = DetectionFilterInit::default().build()?;
        let boxes = array![[[0.0, 0.0, 10.0, 10.0]]];
        let probs = array![[0.95, 0.05]];
        assert!(filter.forward(boxes.view(), probs.view())?.is_empty());

        let detections = filter.forward(Array3::zeros((0, 80, 4)).view(), Array2::zeros((0, 81)).view())?;
        assert!(detections.is_empty());

        assert!(filter
            .forward(Array3::zeros((1, 2, 4)).view(), Array2::zeros((1, 2)).view())
            .is_err());
        Ok(())
    }

    #[test]
    fn decode_head_outputs() -> Result<()> {
        let filter = DetectionFilterInit::default().build()?;
        let coder = crate::box_coder::BoxCoderInit::default().build()?;
        let proposals: BoxArray = (&[[10.0, 10.0, 20.0, 20.0], [0.0, 0.0, 40.0, 80.0]][..]).try_into()?;
        let label_logits = array![[0.0, 5.0], [5.0, 0.0]];
        let box_logits = Array3::zeros((2, 1, 4));
        let window = HW::from_hw([50.0, 50.0]);

        let detections =
            filter.from_head_outputs(&coder, &proposals, label_logits.view(), box_logits.view(), &window)?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].box_index, 0);
        assert_eq!(detections[0].rect.xyxy(), [10.0, 10.0, 20.0, 20.0]);
        assert!(detections[0].score > 0.99);
        Ok(())
    }
}
