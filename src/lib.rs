pub mod backends;
pub mod config;
pub mod container;
pub mod errors;
pub mod imageops;
pub mod model;
pub mod plot;
pub mod segment;
pub mod traits;

pub mod mocks;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{info, warn};
use ndarray::Axis;
use rayon::prelude::*;
use walkdir::WalkDir;

pub use backends::{BackendFamily, ModelInstance, ModelKwargs, SegmentationModel};
pub use config::Config;
pub use container::{uncrop, Crop, ImageContainer, ImageLayer, LayerData};
pub use errors::{Result, TileSegError};
pub use model::OnnxModel;
pub use segment::{relabel_tiles, segment, segment_crops, segment_with_model, SegmentOptions};
pub use traits::*;

const SOURCE_KEY: &str = "image";

/// Segments every image found under the configured input directory and
/// writes one 16-bit label map per image.
pub struct ImageProcessor {
    model: SegmentationModel,
    options: SegmentOptions,
    config: Config,
}

impl ImageProcessor {
    /// Build the backend up front so configuration errors surface before any
    /// file is read.
    pub fn new(options: SegmentOptions, config: Config) -> Result<Self> {
        let family: BackendFamily = options.family.parse()?;
        let model =
            SegmentationModel::from_family(family, options.instance.clone(), &options.kwargs)?;
        Ok(Self {
            model,
            options,
            config,
        })
    }

    /// Resolve `--model` into an instance: an ONNX network for the
    /// pretrained family, an algorithm name otherwise.
    pub fn from_config(config: Config) -> Result<Self> {
        let mut options = config.segment_options();
        options.instance = match (&config.model, config.backend.parse::<BackendFamily>()?) {
            (Some(path), BackendFamily::Tensorflow) => {
                let model = OnnxModel::new(Path::new(path), config.device_id)?;
                ModelInstance::Predictor(Arc::new(model))
            }
            (Some(name), _) => ModelInstance::Name(name.clone()),
            (None, _) => ModelInstance::None,
        };
        Self::new(options, config)
    }

    pub fn process_directory(&self) -> Result<usize> {
        let input_path = &self.config.input_dir;
        let output_path = &self.config.output_dir;

        if !input_path.exists() {
            return Err(TileSegError::FileSystem {
                path: input_path.clone(),
                operation: "input directory check".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input directory does not exist",
                ),
            });
        }

        fs::create_dir_all(output_path).map_err(|e| TileSegError::FileSystem {
            path: output_path.clone(),
            operation: "output directory creation".to_string(),
            source: e,
        })?;

        let image_files = self.collect_image_files(input_path);
        if image_files.is_empty() {
            warn!("no images found under {}", input_path.display());
            return Ok(0);
        }

        let pb = ProgressBar::new(image_files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| TileSegError::configuration(e.to_string()))?
                .progress_chars("#>-"),
        );

        image_files
            .par_iter()
            .progress_with(pb.clone())
            .try_for_each(|input_file| self.process_single_image(input_file, output_path))?;

        pb.finish_and_clear();
        info!("segmented {} images into {}", image_files.len(), output_path.display());
        Ok(image_files.len())
    }

    fn collect_image_files(&self, input_path: &Path) -> Vec<PathBuf> {
        WalkDir::new(input_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| path.is_file() && self.is_supported_image_format(path))
            .collect()
    }

    pub fn is_supported_image_format(&self, path: &Path) -> bool {
        ImageFormat::from_path(path).is_ok_and(|format| format.reading_enabled())
    }

    fn process_single_image(&self, input_file: &Path, output_dir: &Path) -> Result<()> {
        let mut container = ImageContainer::new();
        container.open(input_file, SOURCE_KEY)?;
        segment_with_model(&mut container, SOURCE_KEY, &self.model, &self.options)?;

        let key = self.options.output_key();
        let relative = self.get_relative_path(input_file)?;
        let output_file = output_dir.join(&relative).with_extension("png");

        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| TileSegError::FileSystem {
                path: parent.to_path_buf(),
                operation: "output directory creation".to_string(),
                source: e,
            })?;
        }
        container.save_labels(&key, &output_file)?;

        if self.config.overlay {
            let labels = container
                .get(&key)?
                .as_labels()
                .map(|labels| plot::colorize_labels(labels.index_axis(Axis(0), 0)))
                .ok_or_else(|| TileSegError::validation(key.as_str(), "is not a label layer"))?;
            let stem = relative
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("labels");
            // relative to output_dir; save_figure roots it there
            plot::save_figure(
                &labels,
                &relative.with_file_name(format!("{stem}_overlay.png")),
                "png",
                output_dir,
                false,
            )?;
        }

        Ok(())
    }

    pub fn get_relative_path(&self, input_file: &Path) -> Result<PathBuf> {
        let input_dir = &self.config.input_dir;
        input_file
            .strip_prefix(input_dir)
            .map(|p| p.to_path_buf())
            .map_err(|_| TileSegError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "relative path".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "input file is not inside the input directory",
                ),
            })
    }
}
