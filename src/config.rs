use clap::Parser;
use std::path::PathBuf;

use crate::backends::{BackendFamily, BlobParams, ModelKwargs};
use crate::segment::SegmentOptions;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    pub input_dir: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    /// skimage_blob, watershed or tensorflow
    #[arg(short, long, default_value = "watershed", value_parser = check_backend)]
    pub backend: String,

    /// Blob algorithm (log, dog, doh) or path to an ONNX model
    #[arg(short, long)]
    pub model: Option<String>,

    #[arg(long, default_value_t = 0.5)]
    pub threshold: f32,

    /// Binarize with `pixel < threshold` instead of `pixel >= threshold`
    #[arg(long)]
    pub leq: bool,

    /// Keep intensities as they are before blob detection
    #[arg(long)]
    pub no_invert: bool,

    #[arg(long)]
    pub min_sigma: Option<f32>,

    #[arg(long)]
    pub max_sigma: Option<f32>,

    #[arg(long)]
    pub num_sigma: Option<usize>,

    #[arg(long)]
    pub blob_threshold: Option<f32>,

    #[arg(short, long)]
    pub channel: Option<usize>,

    #[arg(long)]
    pub tile_width: Option<usize>,

    #[arg(long)]
    pub tile_height: Option<usize>,

    /// Also write a colorized `<name>_overlay.png` next to each label map
    #[arg(long)]
    pub overlay: bool,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Worker threads; 0 lets rayon decide
    #[arg(short = 'j', long, default_value_t = 0)]
    pub num_threads: usize,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn model_kwargs(&self) -> ModelKwargs {
        ModelKwargs {
            invert: !self.no_invert,
            threshold: self.threshold,
            geq: !self.leq,
            blob: BlobParams {
                min_sigma: self.min_sigma,
                max_sigma: self.max_sigma,
                num_sigma: self.num_sigma,
                sigma_ratio: None,
                threshold: self.blob_threshold,
            },
        }
    }

    /// Segmentation options without a model instance; the caller resolves
    /// `model` since loading a network needs I/O.
    pub fn segment_options(&self) -> SegmentOptions {
        SegmentOptions {
            family: self.backend.clone(),
            kwargs: self.model_kwargs(),
            channel: self.channel,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            ..SegmentOptions::default()
        }
    }
}

fn check_backend(s: &str) -> Result<String, String> {
    s.parse::<BackendFamily>()
        .map(|_| s.to_string())
        .map_err(|e| format!("{e}. Supported backends: `skimage_blob`, `watershed`, `tensorflow`"))
}
