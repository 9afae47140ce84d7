use anyhow::Result;
use clap::Parser;
use log::info;
use mask_rcnn::{
    anchor::AnchorGrid,
    config::{Config, NUM_ROI_LEVELS},
    fpn::MIN_LEVEL,
    proposal::Mode,
};
use prettytable::{cell, row, Table};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Show the parameters of each component
    Info {
        /// configuration file
        config_file: PathBuf,
    },
    /// List the anchor templates
    Anchors {
        /// configuration file
        config_file: PathBuf,
        /// list one set of templates per pyramid level
        #[clap(long)]
        fpn: bool,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Info { config_file } => {
            show_info(config_file)?;
        }
        Opts::Anchors { config_file, fpn } => {
            show_anchors(config_file, fpn)?;
        }
    }

    Ok(())
}

fn show_info(config_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;
    info!("{} classes including the background", config.num_class);

    // proposal generation
    {
        let mut table = Table::new();
        table.add_row(row!["mode", "pre_nms_topk", "post_nms_topk", "min_size", "nms_thresh"]);

        for mode in [Mode::Train, Mode::Test] {
            let generator = config.rpn.proposal_generator_init(mode).build()?;
            table.add_row(row![
                format!("{:?}", mode),
                generator.pre_nms_topk(),
                generator.post_nms_topk(),
                generator.min_size(),
                generator.nms_thresh(),
            ]);
        }

        table.printstd();
    }

    // box coders
    {
        let mut table = Table::new();
        table.add_row(row!["coder", "weights", "decode_clip"]);

        let rpn_coder = config.rpn_box_coder_init().build()?;
        let fast_rcnn_coder = config.fast_rcnn_box_coder_init().build()?;
        for (name, coder) in [("rpn", rpn_coder), ("fast_rcnn", fast_rcnn_coder)] {
            table.add_row(row![
                name,
                format!("{:?}", coder.weights()),
                coder.decode_clip()
            ]);
        }

        table.printstd();
    }

    // sampling and filtering
    {
        let sampler = config.fast_rcnn.target_sampler_init().build()?;
        let router = config.multi_level_roi_align_init().build()?;
        let filter = config.detection_filter_init().build()?;

        let mut table = Table::new();
        table.add_row(row!["parameter", "value"]);
        table.add_row(row!["rpn batch per image", config.rpn.batch_per_image]);
        table.add_row(row!["rpn fg ratio", config.rpn.fg_ratio]);
        table.add_row(row!["roi batch per image", sampler.batch_per_image()]);
        table.add_row(row!["roi max fg", sampler.max_fg()]);
        table.add_row(row!["roi fg thresh", sampler.fg_thresh()]);
        table.add_row(row!["roi strides", format!("{:?}", router.strides())]);
        table.add_row(row!["roi resolution", router.resolution()]);
        table.add_row(row!["mask resolution", config.mask.resolution]);
        table.add_row(row!["mask roi resolution", config.mask.roi_resolution]);
        table.add_row(row!["score thresh", filter.score_thresh()]);
        table.add_row(row!["results per image", filter.results_per_image()]);
        table.printstd();
    }

    Ok(())
}

fn show_anchors(config_file: impl AsRef<Path>, fpn: bool) -> Result<()> {
    let config = Config::open(config_file)?;

    let grids: Vec<(String, AnchorGrid)> = if fpn {
        config
            .fpn_anchor_grids()?
            .into_iter()
            .enumerate()
            .map(|(index, grid)| {
                let level = index + MIN_LEVEL;
                let name = if index < NUM_ROI_LEVELS {
                    format!("P{}", level)
                } else {
                    format!("P{} (anchors only)", level)
                };
                (name, grid)
            })
            .collect()
    } else {
        vec![("C4".to_string(), config.anchor_grid()?)]
    };

    let mut table = Table::new();
    table.add_row(row!["level", "stride", "field", "x1", "y1", "x2", "y2"]);

    for (name, grid) in &grids {
        for anchor in grid.cell_anchors().rows() {
            table.add_row(row![
                name,
                grid.stride(),
                format!("{0}x{0}", grid.field_size()),
                anchor[0],
                anchor[1],
                anchor[2],
                anchor[3],
            ]);
        }
    }

    table.printstd();

    Ok(())
}
