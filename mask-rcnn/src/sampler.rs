//! Training ROI sampling for the second stage and the mask head.

use crate::{box_coder::BoxCoder, boxes::BoxArray, common::*, roi_align, utils};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSamplerInit {
    pub batch_per_image: usize,
    pub fg_thresh: R64,
    pub fg_ratio: R64,
}

impl Default for TargetSamplerInit {
    fn default() -> Self {
        Self {
            batch_per_image: 512,
            fg_thresh: r64(0.5),
            fg_ratio: r64(0.25),
        }
    }
}

impl TargetSamplerInit {
    pub fn build(self) -> Result<TargetSampler> {
        let Self {
            batch_per_image,
            fg_thresh,
            fg_ratio,
        } = self;

        ensure!(batch_per_image > 0, "batch_per_image must be positive");
        ensure!(
            (0.0..=1.0).contains(&fg_thresh.raw()),
            "fg_thresh must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&fg_ratio.raw()),
            "fg_ratio must be in range [0, 1]"
        );

        Ok(TargetSampler {
            batch_per_image,
            fg_thresh: fg_thresh.raw() as f32,
            max_fg: (batch_per_image as f64 * fg_ratio.raw()) as usize,
        })
    }
}

/// Samples a foreground/background minibatch of ROIs against ground truth.
#[derive(Debug, Clone, CopyGetters)]
pub struct TargetSampler {
    #[get_copy = "pub"]
    batch_per_image: usize,
    #[get_copy = "pub"]
    fg_thresh: f32,
    #[get_copy = "pub"]
    max_fg: usize,
}

/// How well the proposals cover the ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalMetrics {
    pub mean_best_iou: f32,
    pub recall_at_0_3: f32,
    pub recall_at_0_5: f32,
}

impl ProposalMetrics {
    /// Compute from the `[num_proposals, num_gt]` IoU matrix. Returns `None`
    /// when there is no ground truth.
    pub fn from_iou(iou: ArrayView2<'_, f32>) -> Option<Self> {
        let num_gt = iou.ncols();
        if num_gt == 0 {
            return None;
        }

        let best: Vec<f32> = iou
            .columns()
            .into_iter()
            .map(|column| column.fold(0f32, |max, &value| max.max(value)))
            .collect();
        let recall = |thresh: f32| {
            best.iter().filter(|&&value| value >= thresh).count() as f32 / num_gt as f32
        };

        Some(Self {
            mean_best_iou: best.iter().sum::<f32>() / num_gt as f32,
            recall_at_0_3: recall(0.3),
            recall_at_0_5: recall(0.5),
        })
    }
}

/// Sampled ROIs, foreground rows first.
#[derive(Debug, Clone, Getters)]
pub struct SampledTargets {
    #[get = "pub"]
    boxes: BoxArray,
    /// Class labels, `0` for background.
    #[get = "pub"]
    labels: Array1<i64>,
    /// The matched gt index of each foreground row.
    #[get = "pub"]
    fg_gt_indexes: Vec<usize>,
    #[get = "pub"]
    metrics: Option<ProposalMetrics>,
}

impl SampledTargets {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn num_fg(&self) -> usize {
        self.fg_gt_indexes.len()
    }

    pub fn fg_boxes(&self) -> BoxArray {
        self.boxes.select(&(0..self.num_fg()).collect::<Vec<_>>())
    }

    pub fn fg_labels(&self) -> Array1<i64> {
        self.labels.slice(s![..self.num_fg()]).to_owned()
    }

    /// Regression targets of the foreground rows against their matched gt boxes.
    pub fn box_targets(&self, gt_boxes: &BoxArray, coder: &BoxCoder) -> Result<Array2<f32>> {
        ensure!(
            self.fg_gt_indexes.iter().all(|&index| index < gt_boxes.len()),
            "foreground rows refer to missing gt boxes"
        );
        let matched = gt_boxes.select(&self.fg_gt_indexes);
        coder.encode(&matched, &self.fg_boxes())
    }
}

impl TargetSampler {
    pub fn forward<R>(
        &self,
        proposals: &BoxArray,
        gt_boxes: &BoxArray,
        gt_labels: ArrayView1<'_, i64>,
        rng: &mut R,
    ) -> Result<SampledTargets>
    where
        R: Rng + ?Sized,
    {
        ensure!(
            gt_boxes.len() == gt_labels.len(),
            "the number of gt boxes ({}) and labels ({}) mismatch",
            gt_boxes.len(),
            gt_labels.len()
        );
        ensure!(
            gt_labels.iter().all(|&label| label >= 1),
            "gt labels must be foreground class ids"
        );

        let num_gt = gt_boxes.len();
        let iou = proposals.pairwise_iou(gt_boxes);
        let metrics = ProposalMetrics::from_iou(iou.view());

        // gt boxes join the candidates with identity overlaps
        let candidates = proposals.concat(gt_boxes);
        let iou = ndarray::concatenate(Axis(0), &[iou.view(), Array2::eye(num_gt).view()])?;

        let (fg_indexes, bg_indexes): (Vec<usize>, Vec<usize>) =
            (0..candidates.len()).partition(|&index| {
                let max = iou.row(index).fold(f32::NEG_INFINITY, |max, &value| max.max(value));
                max >= self.fg_thresh
            });

        let num_fg = self.max_fg.min(fg_indexes.len());
        let fg_picks: Vec<usize> = index::sample(rng, fg_indexes.len(), num_fg)
            .into_iter()
            .map(|pick| fg_indexes[pick])
            .collect();

        let num_bg = (self.batch_per_image - num_fg).min(bg_indexes.len());
        let bg_picks: Vec<usize> = index::sample(rng, bg_indexes.len(), num_bg)
            .into_iter()
            .map(|pick| bg_indexes[pick])
            .collect();

        debug!("sampled {} fg and {} bg ROIs", num_fg, num_bg);

        let fg_gt_indexes: Vec<usize> = fg_picks
            .iter()
            .map(|&index| utils::argmax(iou.row(index)))
            .collect::<Option<_>>()
            .ok_or_else(|| format_err!("foreground row without gt overlap"))?;

        let labels: Array1<i64> = chain!(
            fg_gt_indexes.iter().map(|&gt_index| gt_labels[gt_index]),
            iter::repeat(0).take(num_bg)
        )
        .collect();
        let picks: Vec<usize> = chain!(fg_picks, bg_picks).collect();

        Ok(SampledTargets {
            boxes: candidates.select(&picks),
            labels,
            fg_gt_indexes,
            metrics,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskTargetSamplerInit {
    pub resolution: usize,
}

impl Default for MaskTargetSamplerInit {
    fn default() -> Self {
        Self { resolution: 28 }
    }
}

impl MaskTargetSamplerInit {
    pub fn build(self) -> Result<MaskTargetSampler> {
        let Self { resolution } = self;
        ensure!(resolution > 0, "mask resolution must be positive");
        Ok(MaskTargetSampler { resolution })
    }
}

/// Crops the matched gt mask of each foreground ROI.
#[derive(Debug, Clone, CopyGetters)]
pub struct MaskTargetSampler {
    #[get_copy = "pub"]
    resolution: usize,
}

impl MaskTargetSampler {
    /// Produce `[num_fg, R, R]` continuous mask targets from `[num_gt, H, W]`
    /// gt masks with values in `[0, 1]`.
    pub fn forward(&self, targets: &SampledTargets, gt_masks: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let resolution = self.resolution;
        let num_fg = targets.num_fg();
        let fg_boxes = targets.fg_boxes();
        let mut output = Array3::zeros((num_fg, resolution, resolution));

        for (fg_index, &gt_index) in targets.fg_gt_indexes().iter().enumerate() {
            ensure!(
                gt_index < gt_masks.shape()[0],
                "gt index {} exceeds the number of masks {}",
                gt_index,
                gt_masks.shape()[0]
            );
            let mask = gt_masks.slice(s![gt_index..=gt_index, .., ..]);
            let rect = fg_boxes.select(&[fg_index]);
            let crop = roi_align::crop_and_resize(mask, &rect, resolution, true)?;
            output
                .slice_mut(s![fg_index, .., ..])
                .assign(&crop.slice(s![0, 0, .., ..]));
        }

        Ok(output)
    }
}
