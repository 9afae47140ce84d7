//! Conversion between absolute boxes and regression targets.

use crate::{boxes::BoxArray, common::*};

/// The default clamp on `tw`, `th` before exponentiation.
pub fn default_decode_clip() -> R64 {
    r64((1333.0f64 / 16.0).ln())
}

/// Box coder initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxCoderInit {
    /// The weights multiplied onto `(tx, ty, tw, th)` when encoding.
    pub weights: [R64; 4],
    /// The upper bound of `tw` and `th` applied before exponentiation.
    pub decode_clip: R64,
}

impl Default for BoxCoderInit {
    fn default() -> Self {
        Self {
            weights: [r64(1.0); 4],
            decode_clip: default_decode_clip(),
        }
    }
}

impl BoxCoderInit {
    pub fn build(self) -> Result<BoxCoder> {
        let Self {
            weights,
            decode_clip,
        } = self;

        ensure!(
            weights.iter().all(|&weight| weight > 0.0),
            "box coder weights must be positive"
        );

        Ok(BoxCoder {
            weights: weights.map(|weight| weight.raw() as f32),
            decode_clip: decode_clip.raw() as f32,
        })
    }
}

/// Encodes boxes as `(tx, ty, tw, th)` against reference boxes and back.
///
/// `tx, ty` are center offsets normalized by the reference width and height,
/// `tw, th` are log ratios of the sizes. Reference boxes must have positive
/// size. Zero-size boxes encode to `-inf` in `tw` or `th`.
#[derive(Debug, Clone, PartialEq, CopyGetters)]
pub struct BoxCoder {
    #[get_copy = "pub"]
    weights: [f32; 4],
    #[get_copy = "pub"]
    decode_clip: f32,
}

impl BoxCoder {
    pub fn encode_one(&self, rect: &XYXY<f32>, anchor: &XYXY<f32>) -> [f32; 4] {
        let [wx, wy, ww, wh] = self.weights;
        let [xa, ya, wa, ha] = anchor.cxcywh();
        let [xb, yb, wb, hb] = rect.cxcywh();

        [
            (xb - xa) / wa * wx,
            (yb - ya) / ha * wy,
            (wb / wa).ln() * ww,
            (hb / ha).ln() * wh,
        ]
    }

    /// Decode one target against its anchor. Fails when a coordinate comes out NaN.
    pub fn decode_one(&self, target: [f32; 4], anchor: &XYXY<f32>) -> Result<XYXY<f32>> {
        let [wx, wy, ww, wh] = self.weights;
        let [tx, ty, tw, th] = target;
        let [xa, ya, wa, ha] = anchor.cxcywh();

        let tw = (tw / ww).min(self.decode_clip);
        let th = (th / wh).min(self.decode_clip);

        let cxcywh = [
            tx / wx * wa + xa,
            ty / wy * ha + ya,
            tw.exp() * wa,
            th.exp() * ha,
        ];
        XYXY::try_from_cxcywh(cxcywh)
            .with_context(|| format!("unable to decode {:?} against {:?}", target, anchor))
    }

    /// Encode each box against the anchor in the same row.
    pub fn encode(&self, boxes: &BoxArray, anchors: &BoxArray) -> Result<Array2<f32>> {
        ensure!(
            boxes.len() == anchors.len(),
            "the number of boxes ({}) and anchors ({}) mismatch",
            boxes.len(),
            anchors.len()
        );

        let rows: Vec<[f32; 4]> = izip!(boxes.rects(), anchors.rects())
            .map(|(rect, anchor)| self.encode_one(&rect, &anchor))
            .collect();
        Ok(Array2::from(rows))
    }

    /// Decode each target row against the anchor in the same row.
    pub fn decode(&self, targets: ArrayView2<'_, f32>, anchors: &BoxArray) -> Result<BoxArray> {
        ensure!(
            targets.ncols() == 4,
            "expect [n, 4] regression targets, but get shape {:?}",
            targets.shape()
        );
        ensure!(
            targets.nrows() == anchors.len(),
            "the number of targets ({}) and anchors ({}) mismatch",
            targets.nrows(),
            anchors.len()
        );

        let rects = izip!(targets.rows(), anchors.rects())
            .map(|(target, anchor)| {
                self.decode_one([target[0], target[1], target[2], target[3]], &anchor)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(BoxArray::from_rects(rects))
    }
}
