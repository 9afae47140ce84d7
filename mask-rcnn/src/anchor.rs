//! Anchor templates, the static anchor field and RPN anchor labeling.

use crate::{box_coder::BoxCoder, boxes::BoxArray, common::*};

/// Enumerate the anchor templates of one grid cell.
///
/// The base cell is `[0, 0, stride - 1, stride - 1]`. Templates are ordered
/// ratio-major: all sizes of the first ratio come first. `sizes` are in
/// pixels and `ratios` are `h / w`.
pub fn cell_anchors(stride: usize, sizes: &[usize], ratios: &[R64]) -> Result<Array2<f32>> {
    ensure!(stride > 0, "anchor stride must be positive");
    ensure!(!sizes.is_empty(), "anchor sizes must not be empty");
    ensure!(
        ratios.iter().all(|&ratio| ratio > 0.0),
        "anchor ratios must be positive"
    );

    let base = stride as f64;
    let center = (base - 1.0) / 2.0;
    let base_area = base * base;

    let rows: Vec<[f32; 4]> = ratios
        .iter()
        .flat_map(|&ratio| {
            let ratio = ratio.raw();
            let ratio_w = round_half_even((base_area / ratio).sqrt());
            let ratio_h = round_half_even(ratio_w * ratio);

            sizes.iter().map(move |&size| {
                let scale = size as f64 / base;
                let w = ratio_w * scale;
                let h = ratio_h * scale;
                [
                    (center - (w - 1.0) / 2.0) as f32,
                    (center - (h - 1.0) / 2.0) as f32,
                    (center + (w - 1.0) / 2.0) as f32,
                    (center + (h - 1.0) / 2.0) as f32,
                ]
            })
        })
        .collect();

    Ok(Array2::from(rows))
}

fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        (value / 2.0).round() * 2.0
    } else {
        rounded
    }
}

/// The precomputed anchors covering the largest supported image.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct AnchorGrid {
    #[get_copy = "pub"]
    stride: usize,
    #[get_copy = "pub"]
    field_size: usize,
    #[get = "pub"]
    cell_anchors: Array2<f32>,
    /// In shape `[field_size, field_size, num_anchors, 4]`.
    #[get = "pub"]
    field: Array4<f32>,
}

impl AnchorGrid {
    pub fn new(stride: usize, sizes: &[usize], ratios: &[R64], max_size: usize) -> Result<Self> {
        ensure!(max_size > 0, "max_size must be positive");
        let cell_anchors = cell_anchors(stride, sizes, ratios)?;
        let num_anchors = cell_anchors.nrows();
        let field_size = (max_size + stride - 1) / stride;

        let field = Array4::from_shape_fn(
            (field_size, field_size, num_anchors, 4),
            |(iy, ix, anchor, coord)| {
                let shift = (if coord % 2 == 0 { ix } else { iy }) * stride;
                // inclusive pixel corners become exclusive
                let extent = if coord >= 2 { 1.0 } else { 0.0 };
                cell_anchors[(anchor, coord)] + shift as f32 + extent
            },
        );

        Ok(Self {
            stride,
            field_size,
            cell_anchors,
            field,
        })
    }

    pub fn num_anchors(&self) -> usize {
        self.cell_anchors.nrows()
    }

    /// Flatten the anchors over a `fh x fw` feature map in `(y, x, anchor)` order.
    pub fn anchors_for_feature(&self, fh: usize, fw: usize) -> Result<BoxArray> {
        ensure!(
            fh <= self.field_size && fw <= self.field_size,
            "feature size {}x{} exceeds the anchor field {}x{}",
            fh,
            fw,
            self.field_size,
            self.field_size
        );

        let num_rows = fh * fw * self.num_anchors();
        let array = self
            .field
            .slice(s![..fh, ..fw, .., ..])
            .to_owned()
            .into_shape((num_rows, 4))?;
        array.try_into()
    }

    pub fn all_anchors(&self) -> Result<BoxArray> {
        self.anchors_for_feature(self.field_size, self.field_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorLabelerInit {
    pub positive_thresh: R64,
    pub negative_thresh: R64,
    pub crowd_overlap_thresh: R64,
    pub batch_per_image: usize,
    pub fg_ratio: R64,
}

impl Default for AnchorLabelerInit {
    fn default() -> Self {
        Self {
            positive_thresh: r64(0.7),
            negative_thresh: r64(0.3),
            crowd_overlap_thresh: r64(0.7),
            batch_per_image: 256,
            fg_ratio: r64(0.5),
        }
    }
}

impl AnchorLabelerInit {
    pub fn build(self) -> Result<AnchorLabeler> {
        let Self {
            positive_thresh,
            negative_thresh,
            crowd_overlap_thresh,
            batch_per_image,
            fg_ratio,
        } = self;

        ensure!(
            negative_thresh >= 0.0 && negative_thresh <= positive_thresh && positive_thresh <= 1.0,
            "anchor thresholds must satisfy 0 <= negative_thresh <= positive_thresh <= 1"
        );
        ensure!(
            (0.0..=1.0).contains(&crowd_overlap_thresh.raw()),
            "crowd_overlap_thresh must be in range [0, 1]"
        );
        ensure!(batch_per_image > 0, "batch_per_image must be positive");
        ensure!(
            (0.0..=1.0).contains(&fg_ratio.raw()),
            "fg_ratio must be in range [0, 1]"
        );

        Ok(AnchorLabeler {
            positive_thresh: positive_thresh.raw() as f32,
            negative_thresh: negative_thresh.raw() as f32,
            crowd_overlap_thresh: crowd_overlap_thresh.raw() as f32,
            batch_per_image,
            max_fg: (batch_per_image as f64 * fg_ratio.raw()) as usize,
        })
    }
}

/// Assigns positive, negative and ignore labels to anchors for RPN training.
#[derive(Debug, Clone)]
pub struct AnchorLabeler {
    positive_thresh: f32,
    negative_thresh: f32,
    crowd_overlap_thresh: f32,
    batch_per_image: usize,
    max_fg: usize,
}

/// Per-anchor training targets.
#[derive(Debug, Clone, Getters)]
pub struct AnchorTargets {
    /// `1` positive, `0` negative, `-1` ignored.
    #[get = "pub"]
    labels: Array1<i64>,
    /// The matched gt box of each positive anchor, zeros elsewhere.
    #[get = "pub"]
    boxes: Array2<f32>,
}

impl AnchorTargets {
    pub fn num_positive(&self) -> usize {
        self.labels.iter().filter(|&&label| label == 1).count()
    }

    pub fn num_negative(&self) -> usize {
        self.labels.iter().filter(|&&label| label == 0).count()
    }

    /// Encode the matched gt boxes against their anchors. Rows of
    /// non-positive anchors stay zero.
    pub fn encoded_boxes(&self, anchors: &BoxArray, coder: &BoxCoder) -> Result<Array2<f32>> {
        ensure!(
            anchors.len() == self.labels.len(),
            "the number of anchors ({}) and labels ({}) mismatch",
            anchors.len(),
            self.labels.len()
        );

        let mut encoded = Array2::zeros((anchors.len(), 4));
        izip!(encoded.rows_mut(), self.boxes.rows(), &self.labels)
            .enumerate()
            .filter(|(_, (_, _, &label))| label == 1)
            .for_each(|(index, (mut dst, gt, _))| {
                let gt = XYXY::from_xyxy([gt[0], gt[1], gt[2], gt[3]]);
                let target = coder.encode_one(&gt, &anchors.rect(index));
                dst.assign(&ndarray::aview1(&target));
            });
        Ok(encoded)
    }
}

impl AnchorLabeler {
    pub fn forward<R>(
        &self,
        anchors: &BoxArray,
        window: &HW<f32>,
        gt_boxes: &BoxArray,
        crowd_boxes: &BoxArray,
        rng: &mut R,
    ) -> Result<AnchorTargets>
    where
        R: Rng + ?Sized,
    {
        let num_anchors = anchors.len();
        let inside = anchors.indexes_inside(window);
        let inside_anchors = anchors.select(&inside);

        let mut labels = Array1::from_elem(inside.len(), -1i64);
        let iou = inside_anchors.pairwise_iou(gt_boxes);

        let (max_per_anchor, argmax_per_anchor): (Vec<f32>, Vec<usize>) = iou
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((f32::NEG_INFINITY, 0), |(max, argmax), (index, &value)| {
                        if value > max {
                            (value, index)
                        } else {
                            (max, argmax)
                        }
                    })
            })
            .unzip();

        if gt_boxes.is_empty() {
            labels.fill(0);
        } else {
            // every anchor reaching the best overlap of some gt is positive
            for column in iou.columns() {
                let best = column.fold(0f32, |max, &value| max.max(value));
                if best <= 0.0 {
                    continue;
                }
                column
                    .iter()
                    .enumerate()
                    .filter(|(_, &value)| value == best)
                    .for_each(|(index, _)| labels[index] = 1);
            }

            for (label, &max) in izip!(labels.iter_mut(), &max_per_anchor) {
                if max >= self.positive_thresh {
                    *label = 1;
                }
            }
            for (label, &max) in izip!(labels.iter_mut(), &max_per_anchor) {
                if max < self.negative_thresh {
                    *label = 0;
                }
            }
        }

        if !crowd_boxes.is_empty() {
            let crowd_iou = inside_anchors.pairwise_iou(crowd_boxes);
            for (label, row) in izip!(labels.iter_mut(), crowd_iou.rows()) {
                let max = row.fold(0f32, |max, &value| max.max(value));
                if *label >= 0 && max > self.crowd_overlap_thresh {
                    *label = -1;
                }
            }
        }

        let num_fg = disable_excess(&mut labels, 1, self.max_fg, rng);
        let num_bg_before = labels.iter().filter(|&&label| label == 0).count();
        ensure!(num_bg_before > 0, "no valid background anchor for RPN");
        let num_bg = disable_excess(
            &mut labels,
            0,
            self.batch_per_image.saturating_sub(num_fg),
            rng,
        );

        debug!(
            "labeled {} positive and {} negative anchors among {} inside the window",
            num_fg,
            num_bg,
            inside.len()
        );

        // scatter back to the full anchor list
        let mut all_labels = Array1::from_elem(num_anchors, -1i64);
        let mut all_boxes = Array2::zeros((num_anchors, 4));
        for (inside_index, &anchor_index) in inside.iter().enumerate() {
            let label = labels[inside_index];
            all_labels[anchor_index] = label;
            if label == 1 {
                let gt = gt_boxes.array().row(argmax_per_anchor[inside_index]);
                all_boxes.row_mut(anchor_index).assign(&gt);
            }
        }

        Ok(AnchorTargets {
            labels: all_labels,
            boxes: all_boxes,
        })
    }
}

/// Randomly set labels equal to `value` to `-1` until at most `max_num`
/// remain. Returns the remaining count.
fn disable_excess<R>(labels: &mut Array1<i64>, value: i64, max_num: usize, rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let indexes: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label == value)
        .map(|(index, _)| index)
        .collect();

    if indexes.len() <= max_num {
        return indexes.len();
    }

    let num_disabled = indexes.len() - max_num;
    index::sample(rng, indexes.len(), num_disabled)
        .into_iter()
        .for_each(|pick| labels[indexes[pick]] = -1);
    max_num
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn ratios() -> Vec<R64> {
        vec![r64(0.5), r64(1.0), r64(2.0)]
    }

    #[test]
    fn cell_anchor_templates() -> Result<()> {
        let anchors = cell_anchors(16, &[128], &ratios())?;
        let expect = [
            [-84.0, -40.0, 99.0, 55.0],
            [-56.0, -56.0, 71.0, 71.0],
            [-36.0, -80.0, 51.0, 95.0],
        ];
        assert_eq!(anchors.shape(), &[3, 4]);
        for (row, expect) in izip!(anchors.rows(), &expect) {
            for (&lhs, &rhs) in izip!(row, expect) {
                assert_abs_diff_eq!(lhs, rhs);
            }
        }

        let anchors = cell_anchors(16, &[32, 64], &ratios())?;
        assert_eq!(anchors.nrows(), 6);
        // ratio-major order
        assert_abs_diff_eq!(anchors[(2, 2)] - anchors[(2, 0)] + 1.0, 32.0);
        assert_abs_diff_eq!(anchors[(3, 2)] - anchors[(3, 0)] + 1.0, 64.0);
        Ok(())
    }

    #[test]
    fn grid_shifts_and_extents() -> Result<()> {
        let grid = AnchorGrid::new(16, &[32], &[r64(1.0)], 64)?;
        assert_eq!(grid.field_size(), 4);
        assert_eq!(grid.field().shape(), &[4, 4, 1, 4]);

        let base = grid.cell_anchors().row(0).to_owned();
        let anchors = grid.anchors_for_feature(2, 3)?;
        assert_eq!(anchors.len(), 6);

        // row-major (y, x) order
        let rect = anchors.rect(4);
        assert_abs_diff_eq!(rect.x1(), base[0] + 16.0);
        assert_abs_diff_eq!(rect.y1(), base[1] + 16.0);
        assert_abs_diff_eq!(rect.x2(), base[2] + 17.0);
        assert_abs_diff_eq!(rect.y2(), base[3] + 17.0);

        assert!(grid.anchors_for_feature(5, 1).is_err());
        Ok(())
    }

    #[test]
    fn label_anchors() -> Result<()> {
        let anchors: BoxArray = (&[
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 11.0, 11.0],
            [30.0, 30.0, 40.0, 40.0],
            [60.0, 60.0, 70.0, 70.0],
            [-5.0, 0.0, 5.0, 10.0],
        ][..])
            .try_into()?;
        let gt: BoxArray = (&[[0.0, 0.0, 10.0, 10.0]][..]).try_into()?;
        let window = HW::from_hw([64.0, 64.0]);

        let labeler = AnchorLabelerInit::default().build()?;
        let mut rng = StdRng::seed_from_u64(7);
        let targets = labeler.forward(&anchors, &window, &gt, &BoxArray::empty(), &mut rng)?;

        assert_eq!(targets.labels().to_vec(), vec![1, -1, 0, -1, -1]);
        assert_eq!(targets.boxes().row(0).to_vec(), vec![0.0, 0.0, 10.0, 10.0]);
        assert_eq!(targets.num_positive(), 1);
        assert_eq!(targets.num_negative(), 1);

        let coder = crate::box_coder::BoxCoderInit::default().build()?;
        let encoded = targets.encoded_boxes(&anchors, &coder)?;
        assert!(encoded.iter().all(|value| value.abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn crowd_overlap_is_ignored() -> Result<()> {
        let anchors: BoxArray = (&[
            [0.0, 0.0, 10.0, 10.0],
            [20.0, 20.0, 30.0, 30.0],
            [40.0, 40.0, 50.0, 50.0],
        ][..])
            .try_into()?;
        let crowd: BoxArray = (&[[20.0, 20.0, 30.0, 30.0]][..]).try_into()?;
        let window = HW::from_hw([64.0, 64.0]);

        let labeler = AnchorLabelerInit::default().build()?;
        let mut rng = StdRng::seed_from_u64(7);
        let targets = labeler.forward(&anchors, &window, &BoxArray::empty(), &crowd, &mut rng)?;
        assert_eq!(targets.labels().to_vec(), vec![0, -1, 0]);
        Ok(())
    }

    #[test]
    fn subsample_to_batch() -> Result<()> {
        let rows: Vec<[f32; 4]> = (0..40)
            .map(|index| {
                let offset = (index % 20) as f32 * 50.0;
                let shift = if index < 20 { 0.0 } else { 500.0 };
                [offset, shift, offset + 10.0, shift + 10.0]
            })
            .collect();
        let anchors: BoxArray = rows.as_slice().try_into()?;
        let gt = anchors.select(&(0..20).collect::<Vec<_>>());
        let window = HW::from_hw([1000.0, 1000.0]);

        let labeler = AnchorLabelerInit {
            batch_per_image: 16,
            ..Default::default()
        }
        .build()?;
        let mut rng = StdRng::seed_from_u64(1);
        let targets = labeler.forward(&anchors, &window, &gt, &BoxArray::empty(), &mut rng)?;
        assert_eq!(targets.num_positive(), 8);
        assert_eq!(targets.num_negative(), 8);
        Ok(())
    }

    #[test]
    fn same_seed_gives_same_labels() -> Result<()> {
        let rows: Vec<[f32; 4]> = (0..60)
            .map(|index| {
                let offset = (index % 20) as f32 * 50.0;
                let shift = (index / 20) as f32 * 300.0;
                [offset, shift, offset + 10.0, shift + 10.0]
            })
            .collect();
        let anchors: BoxArray = rows.as_slice().try_into()?;
        let gt = anchors.select(&(0..20).collect::<Vec<_>>());
        let window = HW::from_hw([1000.0, 1000.0]);
        let labeler = AnchorLabelerInit {
            batch_per_image: 16,
            ..Default::default()
        }
        .build()?;

        let label = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            labeler.forward(&anchors, &window, &gt, &BoxArray::empty(), &mut rng)
        };
        let lhs = label(5)?;
        let rhs = label(5)?;
        assert_eq!(lhs.num_positive(), 8);
        assert_eq!(lhs.num_negative(), 8);
        assert_eq!(lhs.labels(), rhs.labels());
        assert_eq!(lhs.boxes(), rhs.boxes());
        Ok(())
    }

    #[test]
    fn missing_background_is_an_error() -> Result<()> {
        let anchors: BoxArray = (&[[0.0, 0.0, 10.0, 10.0]][..]).try_into()?;
        let window = HW::from_hw([64.0, 64.0]);
        let labeler = AnchorLabelerInit::default().build()?;
        let mut rng = StdRng::seed_from_u64(0);
        let result = labeler.forward(&anchors, &window, &anchors, &BoxArray::empty(), &mut rng);
        assert!(result.is_err());
        Ok(())
    }
}
