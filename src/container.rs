use std::collections::BTreeMap;
use std::path::Path;

use image::{ImageBuffer, ImageFormat, Luma};
use log::{debug, warn};
use ndarray::prelude::*;
use nshare::{AsNdarray2, AsNdarray3};
use num_traits::Zero;

use crate::errors::{Result, TileSegError};

/// Channel dimension name used for images loaded from disk.
pub const DEFAULT_CHANNEL_DIM: &str = "channels";

/// Pixel storage of a layer, always laid out as (channel, y, x).
#[derive(Debug, Clone, PartialEq)]
pub enum LayerData {
    Intensity(Array3<f32>),
    Labels(Array3<u32>),
}

impl LayerData {
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            Self::Intensity(data) => data.dim(),
            Self::Labels(data) => data.dim(),
        }
    }

    fn window(&self, y0: isize, x0: isize, height: usize, width: usize) -> Self {
        match self {
            Self::Intensity(data) => Self::Intensity(window(data, y0, x0, height, width)),
            Self::Labels(data) => Self::Labels(window(data, y0, x0, height, width)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Intensity(_) => "intensity",
            Self::Labels(_) => "labels",
        }
    }
}

/// A named-axis image: pixel data plus the name of its channel dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLayer {
    data: LayerData,
    channel_dim: String,
}

impl ImageLayer {
    pub fn new(data: LayerData, channel_dim: impl Into<String>) -> Self {
        Self {
            data,
            channel_dim: channel_dim.into(),
        }
    }

    pub fn intensity(data: Array3<f32>, channel_dim: impl Into<String>) -> Self {
        Self::new(LayerData::Intensity(data), channel_dim)
    }

    pub fn labels(data: Array3<u32>, channel_dim: impl Into<String>) -> Self {
        Self::new(LayerData::Labels(data), channel_dim)
    }

    pub fn data(&self) -> &LayerData {
        &self.data
    }

    pub fn channel_dim(&self) -> &str {
        &self.channel_dim
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Spatial shape as (height, width).
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, height, width) = self.data.dim();
        (height, width)
    }

    pub fn as_intensity(&self) -> Option<&Array3<f32>> {
        match &self.data {
            LayerData::Intensity(data) => Some(data),
            LayerData::Labels(_) => None,
        }
    }

    pub fn as_labels(&self) -> Option<&Array3<u32>> {
        match &self.data {
            LayerData::Labels(data) => Some(data),
            LayerData::Intensity(_) => None,
        }
    }

    /// Intensity view of the layer; label layers are converted to `f32`.
    pub fn to_intensity(&self) -> Array3<f32> {
        match &self.data {
            LayerData::Intensity(data) => data.clone(),
            LayerData::Labels(data) => data.mapv(|v| v as f32),
        }
    }
}

/// Sub-rectangle of a layer together with its origin in the parent canvas.
///
/// Offsets may be negative for crops centred near the border; the parts
/// outside the parent are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Crop {
    pub layer: ImageLayer,
    pub x0: isize,
    pub y0: isize,
}

impl Crop {
    pub fn width(&self) -> usize {
        self.layer.spatial_shape().1
    }

    pub fn height(&self) -> usize {
        self.layer.spatial_shape().0
    }
}

/// Owns named layers that share one (height, width) canvas.
#[derive(Debug, Clone, Default)]
pub struct ImageContainer {
    layers: BTreeMap<String, ImageLayer>,
    shape: Option<(usize, usize)>,
}

impl ImageContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an image file as an intensity layer scaled to [0, 1].
    ///
    /// Grayscale files keep a single channel, everything else becomes RGB.
    pub fn open(&mut self, path: &Path, key: &str) -> Result<()> {
        let img = image::open(path).map_err(|e| TileSegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "image load".to_string(),
            source: Box::new(e),
        })?;

        let data = if img.color().has_color() {
            img.into_rgb32f().as_ndarray3().to_owned()
        } else {
            img.to_luma32f()
                .as_ndarray2()
                .to_owned()
                .insert_axis(Axis(0))
        };

        debug!("loaded {} as `{}` with shape {:?}", path.display(), key, data.dim());
        self.add_img(ImageLayer::intensity(data, DEFAULT_CHANNEL_DIM), key)
    }

    /// Insert a layer, replacing any existing layer with the same key.
    pub fn add_img(&mut self, layer: ImageLayer, key: &str) -> Result<()> {
        let spatial = layer.spatial_shape();
        match self.shape {
            Some(shape) if shape != spatial => {
                return Err(TileSegError::validation(
                    key,
                    format!("has shape {spatial:?} but the container canvas is {shape:?}"),
                ));
            }
            Some(_) => {}
            None => self.shape = Some(spatial),
        }

        if self.layers.insert(key.to_string(), layer).is_some() {
            warn!("image `{key}` already existed and was overwritten");
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&ImageLayer> {
        self.layers
            .get(key)
            .ok_or_else(|| TileSegError::MissingImage {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.layers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<ImageLayer> {
        let removed = self.layers.remove(key);
        if self.layers.is_empty() {
            self.shape = None;
        }
        removed
    }

    /// Canvas shape as (height, width); `None` while the container is empty.
    pub const fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    /// Partition the layer under `key` into a row-major grid of tiles.
    ///
    /// `None` for a dimension means one tile spans the whole image along it.
    /// Tiles on the right and bottom edges are clipped to the image, so the
    /// tiles cover every pixel exactly once.
    pub fn crop_equally(
        &self,
        width: Option<usize>,
        height: Option<usize>,
        key: &str,
    ) -> Result<Vec<Crop>> {
        let layer = self.get(key)?;
        let (img_height, img_width) = layer.spatial_shape();
        let tile_width = width.unwrap_or(img_width);
        let tile_height = height.unwrap_or(img_height);

        if tile_width == 0 || tile_height == 0 {
            return Err(TileSegError::validation(
                "tile size",
                format!("must be positive, got {tile_width}x{tile_height}"),
            ));
        }

        let mut crops = Vec::new();
        for y0 in (0..img_height).step_by(tile_height) {
            for x0 in (0..img_width).step_by(tile_width) {
                let h = tile_height.min(img_height - y0);
                let w = tile_width.min(img_width - x0);
                crops.push(Crop {
                    layer: ImageLayer::new(
                        layer.data.window(y0 as isize, x0 as isize, h, w),
                        layer.channel_dim.clone(),
                    ),
                    x0: x0 as isize,
                    y0: y0 as isize,
                });
            }
        }

        debug!(
            "cropped `{key}` ({img_width}x{img_height}) into {} tiles of {tile_width}x{tile_height}",
            crops.len()
        );
        Ok(crops)
    }

    /// Extract a `width` x `height` crop centred on pixel (x, y).
    pub fn crop(&self, x: isize, y: isize, width: usize, height: usize, key: &str) -> Result<Crop> {
        if width == 0 || height == 0 {
            return Err(TileSegError::validation(
                "crop size",
                format!("must be positive, got {width}x{height}"),
            ));
        }
        let layer = self.get(key)?;
        let x0 = x - (width / 2) as isize;
        let y0 = y - (height / 2) as isize;

        Ok(Crop {
            layer: ImageLayer::new(
                layer.data.window(y0, x0, height, width),
                layer.channel_dim.clone(),
            ),
            x0,
            y0,
        })
    }

    /// Write the first channel of a label layer as a 16-bit grayscale PNG.
    pub fn save_labels(&self, key: &str, path: &Path) -> Result<()> {
        let layer = self.get(key)?;
        let labels = layer.as_labels().ok_or_else(|| {
            TileSegError::validation(key, "is not a label layer and cannot be saved as labels")
        })?;

        let plane = labels.index_axis(Axis(0), 0);
        let (height, width) = plane.dim();
        let pixels = plane
            .iter()
            .map(|&label| {
                u16::try_from(label).map_err(|_| {
                    TileSegError::validation(key, format!("label {label} does not fit in 16 bits"))
                })
            })
            .collect::<Result<Vec<u16>>>()?;

        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
                TileSegError::validation(key, "label buffer does not match its shape")
            })?;

        buffer
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| TileSegError::ImageProcessing {
                path: path.display().to_string(),
                operation: "label save".to_string(),
                source: Box::new(e),
            })
    }
}

/// Reassemble tiles onto a zeroed canvas of `shape` (height, width).
///
/// Tiles are assumed not to overlap; each one is written at its offset and
/// clipped to the canvas.
pub fn uncrop(tiles: &[Crop], shape: (usize, usize), channel_dim: &str) -> Result<ImageLayer> {
    let first = tiles
        .first()
        .ok_or_else(|| TileSegError::validation("tiles", "cannot uncrop an empty tile list"))?;
    let channels = first.layer.channels();
    let (height, width) = shape;

    for tile in tiles {
        if tile.layer.channels() != channels || tile.layer.data.kind() != first.layer.data.kind() {
            return Err(TileSegError::validation(
                "tiles",
                format!(
                    "mixed tiles: expected {channels} {} channel(s), found {} {}",
                    first.layer.data.kind(),
                    tile.layer.channels(),
                    tile.layer.data.kind()
                ),
            ));
        }
    }

    let data = match &first.layer.data {
        LayerData::Intensity(_) => {
            let mut canvas = Array3::<f32>::zeros((channels, height, width));
            for tile in tiles {
                if let LayerData::Intensity(data) = &tile.layer.data {
                    place(&mut canvas, data, tile.y0, tile.x0);
                }
            }
            LayerData::Intensity(canvas)
        }
        LayerData::Labels(_) => {
            let mut canvas = Array3::<u32>::zeros((channels, height, width));
            for tile in tiles {
                if let LayerData::Labels(data) = &tile.layer.data {
                    place(&mut canvas, data, tile.y0, tile.x0);
                }
            }
            LayerData::Labels(canvas)
        }
    };

    Ok(ImageLayer::new(data, channel_dim))
}

/// Overlap of a `len`-long span starting at `start` with `0..bound`, as
/// (source range, destination offset).
fn overlap(start: isize, len: usize, bound: usize) -> Option<(usize, usize, usize)> {
    let lo = start.max(0);
    let hi = (start + len as isize).min(bound as isize);
    (hi > lo).then(|| (lo as usize, hi as usize, (lo - start) as usize))
}

fn window<T: Copy + Zero>(
    src: &Array3<T>,
    y0: isize,
    x0: isize,
    height: usize,
    width: usize,
) -> Array3<T> {
    let (channels, src_height, src_width) = src.dim();
    let mut out = Array3::zeros((channels, height, width));
    if let (Some((sy0, sy1, oy)), Some((sx0, sx1, ox))) = (
        overlap(y0, height, src_height),
        overlap(x0, width, src_width),
    ) {
        out.slice_mut(s![.., oy..oy + (sy1 - sy0), ox..ox + (sx1 - sx0)])
            .assign(&src.slice(s![.., sy0..sy1, sx0..sx1]));
    }
    out
}

fn place<T: Copy>(canvas: &mut Array3<T>, tile: &Array3<T>, y0: isize, x0: isize) {
    let (_, height, width) = canvas.dim();
    let (_, tile_height, tile_width) = tile.dim();
    if let (Some((cy0, cy1, ty)), Some((cx0, cx1, tx))) = (
        overlap(y0, tile_height, height),
        overlap(x0, tile_width, width),
    ) {
        canvas
            .slice_mut(s![.., cy0..cy1, cx0..cx1])
            .assign(&tile.slice(s![.., ty..ty + (cy1 - cy0), tx..tx + (cx1 - cx0)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((1, height, width), |(_, y, x)| (y * width + x) as f32)
    }

    fn container_with(data: Array3<f32>) -> ImageContainer {
        let mut container = ImageContainer::new();
        container
            .add_img(ImageLayer::intensity(data, DEFAULT_CHANNEL_DIM), "image")
            .unwrap();
        container
    }

    #[test]
    fn test_crop_equally_covers_image_exactly() {
        let container = container_with(ramp(7, 10));
        let crops = container.crop_equally(Some(4), Some(3), "image").unwrap();

        let mut coverage = Array2::<u32>::zeros((7, 10));
        for crop in &crops {
            let (y0, x0) = (crop.y0 as usize, crop.x0 as usize);
            coverage
                .slice_mut(s![y0..y0 + crop.height(), x0..x0 + crop.width()])
                .mapv_inplace(|v| v + 1);
        }

        assert_eq!(crops.len(), 9);
        assert!(coverage.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_crop_equally_defaults_to_whole_image() {
        let container = container_with(ramp(5, 6));
        let crops = container.crop_equally(None, None, "image").unwrap();

        assert_eq!(crops.len(), 1);
        assert_eq!((crops[0].x0, crops[0].y0), (0, 0));
        assert_eq!(crops[0].layer.as_intensity(), Some(&ramp(5, 6)));
    }

    #[test]
    fn test_crop_equally_rejects_zero_tile() {
        let container = container_with(ramp(5, 6));
        let err = container.crop_equally(Some(0), None, "image").unwrap_err();
        assert!(matches!(err, TileSegError::Validation { .. }));
    }

    #[test]
    fn test_missing_key() {
        let container = ImageContainer::new();
        let err = container.crop_equally(None, None, "nope").unwrap_err();
        assert!(matches!(err, TileSegError::MissingImage { key } if key == "nope"));
    }

    #[test]
    fn test_add_img_rejects_misaligned_layer() {
        let mut container = container_with(ramp(5, 6));
        let err = container
            .add_img(ImageLayer::intensity(ramp(6, 5), "c"), "other")
            .unwrap_err();
        assert!(matches!(err, TileSegError::Validation { .. }));
        assert!(!container.contains("other"));
    }

    #[test]
    fn test_centred_crop_is_zero_padded() {
        let container = container_with(ramp(4, 4));
        let crop = container.crop(0, 0, 3, 3, "image").unwrap();

        assert_eq!((crop.x0, crop.y0), (-1, -1));
        let data = crop.layer.as_intensity().unwrap();
        assert_eq!(data[[0, 0, 0]], 0.0);
        assert_eq!(data[[0, 1, 1]], 0.0);
        assert_eq!(data[[0, 1, 2]], 1.0);
        assert_eq!(data[[0, 2, 2]], 5.0);
    }

    #[test]
    fn test_uncrop_restores_tiles() {
        let original = ramp(6, 9);
        let container = container_with(original.clone());
        let crops = container.crop_equally(Some(4), Some(4), "image").unwrap();

        let restored = uncrop(&crops, (6, 9), "channels").unwrap();
        assert_eq!(restored.as_intensity(), Some(&original));
        assert_eq!(restored.channel_dim(), "channels");
    }

    #[test]
    fn test_uncrop_rejects_mixed_tiles() {
        let tiles = vec![
            Crop {
                layer: ImageLayer::intensity(Array3::zeros((1, 2, 2)), "c"),
                x0: 0,
                y0: 0,
            },
            Crop {
                layer: ImageLayer::labels(Array3::zeros((1, 2, 2)), "c"),
                x0: 2,
                y0: 0,
            },
        ];
        assert!(uncrop(&tiles, (2, 4), "c").is_err());
        assert!(uncrop(&[], (2, 4), "c").is_err());
    }

    #[test]
    fn test_save_labels_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.png");

        let mut labels = Array3::<u32>::zeros((1, 3, 4));
        labels[[0, 1, 2]] = 300;
        let mut container = ImageContainer::new();
        container
            .add_img(ImageLayer::labels(labels, "mask"), "seg")
            .unwrap();
        container.save_labels("seg", &path).unwrap();

        let saved = image::open(&path).unwrap().into_luma16();
        assert_eq!(saved.dimensions(), (4, 3));
        assert_eq!(saved.get_pixel(2, 1).0[0], 300);
        assert_eq!(saved.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_save_labels_rejects_wide_labels() {
        let dir = tempfile::tempdir().unwrap();
        let mut labels = Array3::<u32>::zeros((1, 2, 2));
        labels[[0, 0, 0]] = 70_000;
        let mut container = ImageContainer::new();
        container
            .add_img(ImageLayer::labels(labels, "mask"), "seg")
            .unwrap();

        let err = container
            .save_labels("seg", &dir.path().join("x.png"))
            .unwrap_err();
        assert!(matches!(err, TileSegError::Validation { .. }));
    }

    #[test]
    fn test_open_grayscale_and_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let gray_path = dir.path().join("gray.png");
        let rgb_path = dir.path().join("rgb.png");
        image::GrayImage::from_pixel(5, 3, image::Luma([255]))
            .save(&gray_path)
            .unwrap();
        image::RgbImage::from_pixel(5, 3, image::Rgb([255, 0, 0]))
            .save(&rgb_path)
            .unwrap();

        let mut container = ImageContainer::new();
        container.open(&gray_path, "gray").unwrap();
        container.open(&rgb_path, "rgb").unwrap();

        let gray = container.get("gray").unwrap().as_intensity().unwrap();
        assert_eq!(gray.dim(), (1, 3, 5));
        assert!(gray.iter().all(|&v| (v - 1.0).abs() < 1e-6));

        let rgb = container.get("rgb").unwrap().as_intensity().unwrap();
        assert_eq!(rgb.dim(), (3, 3, 5));
        assert!((rgb[[0, 1, 1]] - 1.0).abs() < 1e-6);
        assert_eq!(rgb[[1, 1, 1]], 0.0);
        assert_eq!(container.shape(), Some((3, 5)));
    }
}
