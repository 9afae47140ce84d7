//! The geometric core of a Mask R-CNN detector.
//!
//! The modules connect region proposals to ground truth and to final
//! predictions: box encoding, anchors, proposal generation, training target
//! sampling, ROI Align, feature pyramid routing, detection filtering and the
//! supervised losses. Feature extraction is left to the caller, which passes
//! feature maps and head outputs in as arrays.

mod common;

pub mod anchor;
pub mod box_coder;
pub mod boxes;
pub mod config;
pub mod detection;
pub mod fpn;
pub mod loss;
pub mod nms;
pub mod proposal;
pub mod roi_align;
pub mod sampler;
pub mod utils;
