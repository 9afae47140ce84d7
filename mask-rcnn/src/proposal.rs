//! Region proposals from per-anchor scores and boxes.

use crate::{box_coder::BoxCoder, boxes::BoxArray, common::*, nms};

/// Selects the top-k pair used by the proposal generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Train,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalGeneratorInit {
    pub pre_nms_topk: usize,
    /// Defaults to `pre_nms_topk`.
    pub post_nms_topk: Option<usize>,
    pub min_size: R64,
    pub nms_thresh: R64,
}

impl Default for ProposalGeneratorInit {
    fn default() -> Self {
        Self {
            pre_nms_topk: 6000,
            post_nms_topk: Some(1000),
            min_size: r64(0.0),
            nms_thresh: r64(0.7),
        }
    }
}

impl ProposalGeneratorInit {
    pub fn build(self) -> Result<ProposalGenerator> {
        let Self {
            pre_nms_topk,
            post_nms_topk,
            min_size,
            nms_thresh,
        } = self;

        ensure!(pre_nms_topk > 0, "pre_nms_topk must be positive");
        ensure!(min_size >= 0.0, "min_size must be non-negative");
        ensure!(
            (0.0..=1.0).contains(&nms_thresh.raw()),
            "nms_thresh must be in range [0, 1]"
        );

        Ok(ProposalGenerator {
            pre_nms_topk,
            post_nms_topk: post_nms_topk.unwrap_or(pre_nms_topk),
            min_size: min_size.raw() as f32,
            nms_thresh: nms_thresh.raw() as f32,
        })
    }
}

#[derive(Debug, Clone, CopyGetters)]
pub struct ProposalGenerator {
    #[get_copy = "pub"]
    pre_nms_topk: usize,
    #[get_copy = "pub"]
    post_nms_topk: usize,
    #[get_copy = "pub"]
    min_size: f32,
    #[get_copy = "pub"]
    nms_thresh: f32,
}

/// Kept boxes and their score logits, ordered by descending score.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct Proposals {
    #[get = "pub"]
    boxes: BoxArray,
    #[get = "pub"]
    scores: Array1<f32>,
}

impl Proposals {
    pub fn empty() -> Self {
        Self {
            boxes: BoxArray::empty(),
            scores: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Sigmoid of the score logits.
    pub fn probs(&self) -> Array1<f32> {
        self.scores.mapv(crate::utils::sigmoid)
    }
}

impl From<Proposals> for (BoxArray, Array1<f32>) {
    fn from(from: Proposals) -> Self {
        (from.boxes, from.scores)
    }
}

impl ProposalGenerator {
    /// Pick proposals from decoded per-anchor boxes and score logits.
    pub fn forward(
        &self,
        boxes: &BoxArray,
        scores: ArrayView1<'_, f32>,
        window: &HW<f32>,
    ) -> Result<Proposals> {
        ensure!(
            boxes.len() == scores.len(),
            "the number of boxes ({}) and scores ({}) mismatch",
            boxes.len(),
            scores.len()
        );

        // top-k before clipping
        let topk = self.pre_nms_topk.min(scores.len());
        let topk_indexes: Vec<usize> = nms::argsort_descending(scores)
            .into_iter()
            .take(topk)
            .collect();
        let topk_boxes = boxes.select(&topk_indexes).clip(window);
        let topk_scores = scores.select(Axis(0), &topk_indexes);

        // drop small boxes
        let valid: Vec<usize> = topk_boxes
            .rects()
            .enumerate()
            .filter(|(_, rect)| rect.w() > self.min_size && rect.h() > self.min_size)
            .map(|(index, _)| index)
            .collect();
        let valid_boxes = topk_boxes.select(&valid);
        let valid_scores = topk_scores.select(Axis(0), &valid);

        let keep = nms::non_max_suppression(
            &valid_boxes,
            valid_scores.view(),
            self.nms_thresh,
            self.post_nms_topk,
        )?;

        if keep.is_empty() {
            warn!("no proposal survives among {} anchors", scores.len());
        }
        debug!(
            "kept {} proposals from {} top-k boxes ({} large enough)",
            keep.len(),
            topk,
            valid.len()
        );

        Ok(Proposals {
            boxes: valid_boxes.select(&keep),
            scores: valid_scores.select(Axis(0), &keep),
        })
    }

    /// Decode per-anchor regression logits, then pick proposals.
    pub fn decode_and_forward(
        &self,
        coder: &BoxCoder,
        anchors: &BoxArray,
        box_logits: ArrayView2<'_, f32>,
        scores: ArrayView1<'_, f32>,
        window: &HW<f32>,
    ) -> Result<Proposals> {
        let boxes = coder.decode(box_logits, anchors)?;
        self.forward(&boxes, scores, window)
    }
}
