//! Read-only numeric configuration shared by all components.

use crate::{
    anchor::{AnchorGrid, AnchorLabelerInit},
    box_coder::{default_decode_clip, BoxCoderInit},
    common::*,
    detection::DetectionFilterInit,
    fpn::MultiLevelRoiAlignInit,
    loss::RpnLossInit,
    proposal::{Mode, ProposalGeneratorInit},
    sampler::{MaskTargetSamplerInit, TargetSamplerInit},
};
use std::fs;

pub use anchor::*;
pub use fast_rcnn::*;
pub use fpn::*;
pub use mask::*;
pub use result::*;
pub use rpn::*;

/// The number of pyramid levels ROIs are routed to.
pub const NUM_ROI_LEVELS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The number of classes, background included.
    pub num_class: usize,
    pub anchor: AnchorConfig,
    pub rpn: RpnConfig,
    /// The clamp of `tw` and `th` in box decoding.
    pub decode_clip: R64,
    pub fast_rcnn: FastRcnnConfig,
    pub fpn: FpnConfig,
    pub mask: MaskConfig,
    pub result: ResultConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_class: 81,
            anchor: Default::default(),
            rpn: Default::default(),
            decode_clip: default_decode_clip(),
            fast_rcnn: Default::default(),
            fpn: Default::default(),
            mask: Default::default(),
            result: Default::default(),
        }
    }
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every component can be built from this configuration.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.num_class >= 2,
            "num_class must count the background and at least one class"
        );
        ensure!(
            self.fpn.anchor_strides.len() >= NUM_ROI_LEVELS,
            "fpn.anchor_strides must cover at least {} levels",
            NUM_ROI_LEVELS
        );
        ensure!(
            self.fpn.anchor_strides.len() == self.anchor.sizes.len(),
            "fpn.anchor_strides and anchor.sizes must have the same length"
        );

        self.anchor_grid()?;
        self.fpn_anchor_grids()?;
        self.anchor_labeler_init().build()?;
        self.rpn.proposal_generator_init(Mode::Train).build()?;
        self.rpn.proposal_generator_init(Mode::Test).build()?;
        self.rpn.loss_init().build()?;
        self.rpn_box_coder_init().build()?;
        self.fast_rcnn_box_coder_init().build()?;
        self.fast_rcnn.target_sampler_init().build()?;
        self.multi_level_roi_align_init().build()?;
        self.mask.mask_target_sampler_init().build()?;
        self.detection_filter_init().build()?;
        Ok(())
    }

    /// The single-level anchor field.
    pub fn anchor_grid(&self) -> Result<AnchorGrid> {
        let AnchorConfig {
            stride,
            ref sizes,
            ref ratios,
            max_size,
            ..
        } = self.anchor;
        AnchorGrid::new(stride, sizes, ratios, max_size)
    }

    /// One anchor field per pyramid level, pairing each stride with one size.
    pub fn fpn_anchor_grids(&self) -> Result<Vec<AnchorGrid>> {
        izip!(&self.fpn.anchor_strides, &self.anchor.sizes)
            .map(|(&stride, &size)| {
                AnchorGrid::new(stride, &[size], &self.anchor.ratios, self.anchor.max_size)
            })
            .collect()
    }

    pub fn anchor_labeler_init(&self) -> AnchorLabelerInit {
        AnchorLabelerInit {
            positive_thresh: self.anchor.positive_thresh,
            negative_thresh: self.anchor.negative_thresh,
            crowd_overlap_thresh: self.anchor.crowd_overlap_thresh,
            batch_per_image: self.rpn.batch_per_image,
            fg_ratio: self.rpn.fg_ratio,
        }
    }

    pub fn rpn_box_coder_init(&self) -> BoxCoderInit {
        BoxCoderInit {
            weights: [r64(1.0); 4],
            decode_clip: self.decode_clip,
        }
    }

    pub fn fast_rcnn_box_coder_init(&self) -> BoxCoderInit {
        BoxCoderInit {
            weights: self.fast_rcnn.bbox_reg_weights,
            decode_clip: self.decode_clip,
        }
    }

    pub fn multi_level_roi_align_init(&self) -> MultiLevelRoiAlignInit {
        MultiLevelRoiAlignInit {
            strides: self
                .fpn
                .anchor_strides
                .iter()
                .take(NUM_ROI_LEVELS)
                .copied()
                .collect(),
            resolution: self.fpn.roi_resolution,
        }
    }

    pub fn detection_filter_init(&self) -> DetectionFilterInit {
        DetectionFilterInit {
            score_thresh: self.result.score_thresh,
            nms_thresh: self.fast_rcnn.nms_thresh,
            results_per_image: self.result.results_per_image,
        }
    }
}

mod anchor {
    use super::*;

    /// Anchor templates and RPN anchor labeling thresholds.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AnchorConfig {
        pub stride: usize,
        /// Anchor sizes in pixels, one per pyramid level with FPN.
        pub sizes: Vec<usize>,
        /// Aspect ratios `h / w`.
        pub ratios: Vec<R64>,
        /// The longest image side the anchor field covers.
        pub max_size: usize,
        pub positive_thresh: R64,
        pub negative_thresh: R64,
        pub crowd_overlap_thresh: R64,
    }

    impl Default for AnchorConfig {
        fn default() -> Self {
            Self {
                stride: 16,
                sizes: vec![32, 64, 128, 256, 512],
                ratios: vec![r64(0.5), r64(1.0), r64(2.0)],
                max_size: 1333,
                positive_thresh: r64(0.7),
                negative_thresh: r64(0.3),
                crowd_overlap_thresh: r64(0.7),
            }
        }
    }
}

mod rpn {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RpnConfig {
        pub batch_per_image: usize,
        pub fg_ratio: R64,
        pub min_size: R64,
        pub nms_thresh: R64,
        pub train_pre_nms_topk: usize,
        pub train_post_nms_topk: usize,
        pub test_pre_nms_topk: usize,
        pub test_post_nms_topk: usize,
    }

    impl Default for RpnConfig {
        fn default() -> Self {
            Self {
                batch_per_image: 256,
                fg_ratio: r64(0.5),
                min_size: r64(0.0),
                nms_thresh: r64(0.7),
                train_pre_nms_topk: 12000,
                train_post_nms_topk: 2000,
                test_pre_nms_topk: 6000,
                test_post_nms_topk: 1000,
            }
        }
    }

    impl RpnConfig {
        pub fn proposal_generator_init(&self, mode: Mode) -> ProposalGeneratorInit {
            let (pre_nms_topk, post_nms_topk) = match mode {
                Mode::Train => (self.train_pre_nms_topk, self.train_post_nms_topk),
                Mode::Test => (self.test_pre_nms_topk, self.test_post_nms_topk),
            };

            ProposalGeneratorInit {
                pre_nms_topk,
                post_nms_topk: Some(post_nms_topk),
                min_size: self.min_size,
                nms_thresh: self.nms_thresh,
            }
        }

        pub fn loss_init(&self) -> RpnLossInit {
            RpnLossInit {
                batch_per_image: self.batch_per_image,
            }
        }
    }
}

mod fast_rcnn {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct FastRcnnConfig {
        pub batch_per_image: usize,
        pub fg_thresh: R64,
        pub fg_ratio: R64,
        pub bbox_reg_weights: [R64; 4],
        pub nms_thresh: R64,
    }

    impl Default for FastRcnnConfig {
        fn default() -> Self {
            Self {
                batch_per_image: 512,
                fg_thresh: r64(0.5),
                fg_ratio: r64(0.25),
                bbox_reg_weights: [r64(10.0), r64(10.0), r64(5.0), r64(5.0)],
                nms_thresh: r64(0.5),
            }
        }
    }

    impl FastRcnnConfig {
        pub fn target_sampler_init(&self) -> TargetSamplerInit {
            TargetSamplerInit {
                batch_per_image: self.batch_per_image,
                fg_thresh: self.fg_thresh,
                fg_ratio: self.fg_ratio,
            }
        }
    }
}

mod fpn {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct FpnConfig {
        /// Strides of levels 2 and up. The first few also route ROIs.
        pub anchor_strides: Vec<usize>,
        pub roi_resolution: usize,
    }

    impl Default for FpnConfig {
        fn default() -> Self {
            Self {
                anchor_strides: vec![4, 8, 16, 32, 64],
                roi_resolution: 7,
            }
        }
    }
}

mod mask {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MaskConfig {
        /// The side of the mask targets.
        pub resolution: usize,
        /// The side of the ROI features fed to the mask head.
        pub roi_resolution: usize,
    }

    impl Default for MaskConfig {
        fn default() -> Self {
            Self {
                resolution: 28,
                roi_resolution: 14,
            }
        }
    }

    impl MaskConfig {
        pub fn mask_target_sampler_init(&self) -> MaskTargetSamplerInit {
            MaskTargetSamplerInit {
                resolution: self.resolution,
            }
        }
    }
}

mod result {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ResultConfig {
        pub score_thresh: R64,
        pub results_per_image: usize,
    }

    impl Default for ResultConfig {
        fn default() -> Self {
            Self {
                score_thresh: r64(0.05),
                results_per_image: 100,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() -> Result<()> {
        let config = Config::default();
        config.validate()?;

        let grid = config.anchor_grid()?;
        assert_eq!(grid.num_anchors(), 15);
        assert_eq!(grid.field_size(), 84);

        let grids = config.fpn_anchor_grids()?;
        assert_eq!(grids.len(), 5);
        assert!(grids.iter().all(|grid| grid.num_anchors() == 3));

        let router = config.multi_level_roi_align_init().build()?;
        assert_eq!(router.strides(), &vec![4, 8, 16, 32]);
        Ok(())
    }

    #[test]
    fn mode_selects_topk() -> Result<()> {
        let config = Config::default();
        let train = config.rpn.proposal_generator_init(Mode::Train).build()?;
        let test = config.rpn.proposal_generator_init(Mode::Test).build()?;
        assert_eq!((train.pre_nms_topk(), train.post_nms_topk()), (12000, 2000));
        assert_eq!((test.pre_nms_topk(), test.post_nms_topk()), (6000, 1000));
        Ok(())
    }

    #[test]
    fn partial_json5_uses_defaults() -> Result<()> {
        let text = r#"{
            num_class: 3,
            rpn: { batch_per_image: 128 },
            // trailing comments are allowed
            result: { results_per_image: 50, },
        }"#;
        let config: Config = json5::from_str(text)?;
        config.validate()?;
        assert_eq!(config.num_class, 3);
        assert_eq!(config.rpn.batch_per_image, 128);
        assert_eq!(config.rpn.nms_thresh, r64(0.7));
        assert_eq!(config.result.results_per_image, 50);
        assert_eq!(config.anchor, AnchorConfig::default());
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            num_class: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fast_rcnn.fg_ratio = r64(1.5);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fpn.anchor_strides = vec![4, 8];
        assert!(config.validate().is_err());
    }
}
