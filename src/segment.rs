use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::backends::{BackendFamily, ModelInstance, ModelKwargs, SegmentationModel};
use crate::container::{uncrop, Crop, ImageContainer, ImageLayer};
use crate::errors::{Result, TileSegError};

/// Channel dimension name of label layers written by [`segment`].
pub const MASK_CHANNEL_DIM: &str = "mask";

/// Parameters of the tiled segmentation entry point.
#[derive(Debug, Clone, Default)]
pub struct SegmentOptions {
    /// Backend family name: `skimage_blob`, `watershed` or `tensorflow`.
    pub family: String,
    pub instance: ModelInstance,
    pub kwargs: ModelKwargs,
    /// Segment this channel only; all channels when unset.
    pub channel: Option<usize>,
    pub tile_width: Option<usize>,
    pub tile_height: Option<usize>,
    /// Output key; defaults to `segmented_<family>`.
    pub key_added: Option<String>,
}

impl SegmentOptions {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            ..Self::default()
        }
    }

    pub fn with_instance(mut self, instance: impl Into<ModelInstance>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub const fn with_channel(mut self, channel: usize) -> Self {
        self.channel = Some(channel);
        self
    }

    pub const fn with_tiles(mut self, width: usize, height: usize) -> Self {
        self.tile_width = Some(width);
        self.tile_height = Some(height);
        self
    }

    pub fn with_key_added(mut self, key: impl Into<String>) -> Self {
        self.key_added = Some(key.into());
        self
    }

    pub fn output_key(&self) -> String {
        self.key_added
            .clone()
            .unwrap_or_else(|| format!("segmented_{}", self.family.to_lowercase()))
    }
}

/// Segment the image under `img_key` tile by tile and store the merged
/// label map in the container.
///
/// The backend is resolved before any tile is cropped, so configuration
/// errors never leave partial work behind. A failing tile aborts the whole
/// call and the container is left untouched.
pub fn segment(container: &mut ImageContainer, img_key: &str, options: &SegmentOptions) -> Result<()> {
    let family: BackendFamily = options.family.parse()?;
    let model = SegmentationModel::from_family(family, options.instance.clone(), &options.kwargs)?;
    segment_with_model(container, img_key, &model, options)
}

/// Same as [`segment`] with an already constructed backend; the family and
/// instance fields of `options` are only used to derive the output key.
pub fn segment_with_model(
    container: &mut ImageContainer,
    img_key: &str,
    model: &SegmentationModel,
    options: &SegmentOptions,
) -> Result<()> {
    let shape = container.get(img_key)?.spatial_shape();
    let tiles = container.crop_equally(options.tile_width, options.tile_height, img_key)?;

    // tiles are independent; collect keeps generator order
    let mut masks = tiles
        .par_iter()
        .map(|tile| -> Result<Array2<u32>> {
            let arr = select_channels(tile, options.channel)?;
            let mask = model.segment(arr.view())?;
            debug!(
                "tile at ({}, {}) produced {} labels",
                tile.x0,
                tile.y0,
                mask.iter().copied().max().unwrap_or(0)
            );
            Ok(mask)
        })
        .collect::<Result<Vec<_>>>()?;

    let total = relabel_tiles(&mut masks)?;

    let label_tiles = tiles
        .iter()
        .zip(masks)
        .map(|(tile, mask)| {
            let expected = tile.layer.spatial_shape();
            if mask.dim() != expected {
                return Err(TileSegError::validation(
                    "label mask",
                    format!(
                        "has shape {:?} but its tile at ({}, {}) is {expected:?}",
                        mask.dim(),
                        tile.x0,
                        tile.y0
                    ),
                ));
            }
            Ok(Crop {
                layer: ImageLayer::labels(mask.insert_axis(Axis(0)), MASK_CHANNEL_DIM),
                x0: tile.x0,
                y0: tile.y0,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let merged = uncrop(&label_tiles, shape, MASK_CHANNEL_DIM)?;
    let key = options.output_key();
    info!(
        "segmented `{img_key}` in {} tiles, {total} labels stored as `{key}`",
        label_tiles.len()
    );
    container.add_img(merged, &key)
}

fn select_channels(tile: &Crop, channel: Option<usize>) -> Result<Array3<f32>> {
    let arr = tile.layer.to_intensity();
    match channel {
        None => Ok(arr),
        Some(c) if c < arr.dim().0 => Ok(arr.slice(s![c..c + 1, .., ..]).to_owned()),
        Some(c) => Err(TileSegError::validation(
            "channel",
            format!("index {c} is out of range for {} channels", arr.dim().0),
        )),
    }
}

/// Renumber per-tile labels into one global numbering, in place.
///
/// A running counter starts at 0; each tile's positive labels are shifted by
/// the counter, then the counter grows by the tile's local maximum. Tiles
/// therefore occupy disjoint label ranges even when their labels have gaps.
/// Returns the final counter.
pub fn relabel_tiles(masks: &mut [Array2<u32>]) -> Result<u32> {
    let mut counter = 0u32;

    for (index, mask) in masks.iter_mut().enumerate() {
        let local_max = mask.iter().copied().max().unwrap_or(0);
        if !is_dense(mask, local_max) {
            warn!("tile {index} labels are not dense in 1..={local_max}; the label range keeps its gaps");
        }

        let next = counter.checked_add(local_max).ok_or_else(|| {
            TileSegError::validation(
                "labels",
                format!("relabeling tile {index} overflows the 32-bit label range"),
            )
        })?;

        if counter > 0 {
            mask.mapv_inplace(|v| if v > 0 { v + counter } else { 0 });
        }
        counter = next;
    }
    Ok(counter)
}

fn is_dense(mask: &Array2<u32>, local_max: u32) -> bool {
    let distinct: HashSet<u32> = mask.iter().copied().filter(|&v| v > 0).collect();
    distinct.len() as u64 == u64::from(local_max)
}

/// Centroid of every non-zero label as (label, mean row, mean column), in
/// ascending label order.
pub fn region_centroids(labels: ArrayView2<u32>) -> Vec<(u32, f64, f64)> {
    let mut sums: BTreeMap<u32, (f64, f64, u64)> = BTreeMap::new();
    for ((y, x), &label) in labels.indexed_iter() {
        if label > 0 {
            let entry = sums.entry(label).or_insert((0.0, 0.0, 0));
            entry.0 += y as f64;
            entry.1 += x as f64;
            entry.2 += 1;
        }
    }

    sums.into_iter()
        .map(|(label, (sum_y, sum_x, count))| {
            (label, sum_y / count as f64, sum_x / count as f64)
        })
        .collect()
}

/// Crops of `img_key` centred on each region of `segmented_key`.
///
/// One crop per distinct non-zero label, in ascending label order, centred
/// at the rounded centroid of the region.
pub fn segment_crops(
    container: &ImageContainer,
    img_key: &str,
    segmented_key: &str,
    width: usize,
    height: usize,
) -> Result<Vec<Crop>> {
    let segmented = container.get(segmented_key)?;
    let labels = segmented.as_labels().ok_or_else(|| {
        TileSegError::validation(segmented_key, "is not a label layer")
    })?;
    if labels.dim().0 == 0 {
        return Ok(Vec::new());
    }

    region_centroids(labels.index_axis(Axis(0), 0))
        .into_iter()
        .map(|(_, row, col)| {
            container.crop(
                col.round() as isize,
                row.round() as isize,
                width,
                height,
                img_key,
            )
        })
        .collect()
}
