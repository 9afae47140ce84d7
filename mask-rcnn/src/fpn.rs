//! Routing ROIs to feature pyramid levels.

use crate::{boxes::BoxArray, common::*, roi_align, utils};

/// The pyramid level of the finest feature map.
pub const MIN_LEVEL: usize = 2;

/// The canonical level of a box, `floor(4 + log2(sqrt(area) / 224 + 1e-6))`,
/// clamped to `[MIN_LEVEL, max_level]`.
pub fn assign_level<R>(rect: &R, max_level: usize) -> usize
where
    R: Rect<Type = f32>,
{
    let sqrt_area = crate::boxes::area(rect).sqrt();
    let level = (4.0 + (sqrt_area * (1.0 / 224.0) + 1e-6).ln() * (1.0 / 2f32.ln())).floor();
    (level.max(MIN_LEVEL as f32) as usize).min(max_level)
}

/// The partition of boxes over pyramid levels.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct LevelAssignment {
    /// The level of each box.
    #[get = "pub"]
    levels: Vec<usize>,
    /// Box indexes of each level, from `MIN_LEVEL` upwards, ascending within a level.
    #[get = "pub"]
    level_indexes: Vec<Vec<usize>>,
}

impl LevelAssignment {
    pub fn new(boxes: &BoxArray, num_levels: usize) -> Result<Self> {
        ensure!(num_levels > 0, "at least one pyramid level is required");
        let max_level = MIN_LEVEL + num_levels - 1;
        let levels: Vec<usize> = boxes
            .rects()
            .map(|rect| assign_level(&rect, max_level))
            .collect();

        let mut level_indexes = vec![vec![]; num_levels];
        levels
            .iter()
            .enumerate()
            .for_each(|(index, &level)| level_indexes[level - MIN_LEVEL].push(index));

        Ok(Self {
            levels,
            level_indexes,
        })
    }

    /// Box indexes in level-major order.
    pub fn permutation(&self) -> Vec<usize> {
        self.level_indexes.iter().flatten().copied().collect()
    }

    pub fn num_boxes(&self) -> usize {
        self.levels.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiLevelRoiAlignInit {
    /// Strides of levels `MIN_LEVEL..`, finest first.
    pub strides: Vec<usize>,
    pub resolution: usize,
}

impl Default for MultiLevelRoiAlignInit {
    fn default() -> Self {
        Self {
            strides: vec![4, 8, 16, 32],
            resolution: 7,
        }
    }
}

impl MultiLevelRoiAlignInit {
    pub fn build(self) -> Result<MultiLevelRoiAlign> {
        let Self {
            strides,
            resolution,
        } = self;

        ensure!(!strides.is_empty(), "strides must not be empty");
        ensure!(
            strides.iter().all(|&stride| stride > 0),
            "strides must be positive"
        );
        ensure!(
            strides.windows(2).all(|pair| pair[0] < pair[1]),
            "strides must be increasing"
        );
        ensure!(resolution > 0, "resolution must be positive");

        Ok(MultiLevelRoiAlign {
            strides,
            resolution,
        })
    }
}

/// ROI Align over a feature pyramid, preserving the input box order.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct MultiLevelRoiAlign {
    #[get = "pub"]
    strides: Vec<usize>,
    #[get_copy = "pub"]
    resolution: usize,
}

impl MultiLevelRoiAlign {
    pub fn num_levels(&self) -> usize {
        self.strides.len()
    }

    pub fn assign(&self, boxes: &BoxArray) -> Result<LevelAssignment> {
        LevelAssignment::new(boxes, self.num_levels())
    }

    /// Crop `[n, C, R, R]` features for boxes in image coordinates.
    ///
    /// `features` holds one `[C, H, W]` map per level, finest first.
    pub fn forward(&self, features: &[ArrayView3<'_, f32>], boxes: &BoxArray) -> Result<Array4<f32>> {
        ensure!(
            features.len() == self.num_levels(),
            "expect {} feature maps, but get {}",
            self.num_levels(),
            features.len()
        );

        let assignment = self.assign(boxes)?;

        let level_rois: Vec<Array4<f32>> = izip!(
            assignment.level_indexes(),
            &self.strides,
            features
        )
        .enumerate()
        .map(|(level_offset, (indexes, &stride, feature))| {
            debug!(
                "{} ROIs on level {}",
                indexes.len(),
                level_offset + MIN_LEVEL
            );
            let level_boxes = boxes.select(indexes).scale(1.0 / stride as f32)?;
            roi_align::roi_align(feature.view(), &level_boxes, self.resolution)
        })
        .collect::<Result<_>>()?;

        let views: Vec<_> = level_rois.iter().map(|rois| rois.view()).collect();
        let rois = ndarray::concatenate(Axis(0), &views)
            .with_context(|| "feature maps of different levels must share the channel count")?;

        // restore the input order
        let inverse = utils::invert_permutation(&assignment.permutation())?;
        Ok(rois.select(Axis(0), &inverse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn canonical_levels() {
        let level = |side: f32| assign_level(&XYXY::from_xyxy([0.0, 0.0, side, side]), 5);
        assert_eq!(level(0.0), 2);
        assert_eq!(level(32.0), 2);
        assert_eq!(level(112.0), 3);
        assert_eq!(level(224.0), 4);
        assert_eq!(level(448.0), 5);
        assert_eq!(level(2000.0), 5);
    }

    #[test]
    fn assignment_partitions_boxes() -> Result<()> {
        let boxes: BoxArray = (&[
            [0.0, 0.0, 500.0, 500.0],
            [0.0, 0.0, 20.0, 20.0],
            [0.0, 0.0, 230.0, 230.0],
            [10.0, 10.0, 30.0, 30.0],
        ][..])
            .try_into()?;
        let assignment = LevelAssignment::new(&boxes, 4)?;
        assert_eq!(assignment.levels(), &vec![5, 2, 4, 2]);
        assert_eq!(
            assignment.level_indexes(),
            &vec![vec![1, 3], vec![], vec![2], vec![0]]
        );
        assert_eq!(assignment.permutation(), vec![1, 3, 2, 0]);
        Ok(())
    }

    #[test]
    fn output_follows_input_order() -> Result<()> {
        let router = MultiLevelRoiAlignInit {
            strides: vec![4, 8, 16, 32],
            resolution: 2,
        }
        .build()?;

        // each level is filled with its own level number
        let maps: Vec<Array3<f32>> = (0..4)
            .map(|level| Array3::from_elem((3, 64, 64), (level + MIN_LEVEL) as f32))
            .collect();
        let features: Vec<_> = maps.iter().map(|map| map.view()).collect();

        let boxes: BoxArray = (&[
            [0.0, 0.0, 500.0, 500.0],
            [0.0, 0.0, 20.0, 20.0],
            [0.0, 0.0, 230.0, 230.0],
            [10.0, 10.0, 30.0, 30.0],
            [0.0, 0.0, 120.0, 120.0],
        ][..])
            .try_into()?;

        let rois = router.forward(&features, &boxes)?;
        assert_eq!(rois.shape(), &[5, 3, 2, 2]);
        for (index, &expect) in [5.0, 2.0, 4.0, 2.0, 3.0].iter().enumerate() {
            assert_abs_diff_eq!(rois[(index, 0, 0, 0)], expect);
        }
        Ok(())
    }

    #[test]
    fn uniform_boxes_come_back_in_order() -> Result<()> {
        let router = MultiLevelRoiAlignInit::default().build()?;
        let maps: Vec<Array3<f32>> = vec![
            Array3::from_shape_fn((1, 16, 16), |(_, y, x)| (y * 16 + x) as f32),
            Array3::zeros((1, 8, 8)),
            Array3::zeros((1, 4, 4)),
            Array3::zeros((1, 2, 2)),
        ];
        let features: Vec<_> = maps.iter().map(|map| map.view()).collect();

        let rows: Vec<[f32; 4]> = (0..6)
            .map(|index| {
                let offset = 8.0 * index as f32;
                [offset, offset, offset + 16.0, offset + 16.0]
            })
            .collect();
        let boxes: BoxArray = rows.as_slice().try_into()?;

        let rois = router.forward(&features, &boxes)?;
        let direct = roi_align::roi_align(features[0], &boxes.scale(0.25)?, 7)?;
        assert_eq!(rois, direct);
        Ok(())
    }

    #[test]
    fn level_count_must_match() -> Result<()> {
        let router = MultiLevelRoiAlignInit::default().build()?;
        let map = Array3::zeros((1, 4, 4));
        assert!(router.forward(&[map.view()], &BoxArray::empty()).is_err());
        Ok(())
    }
}
