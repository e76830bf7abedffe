use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use log::{debug, warn};
use ndarray::prelude::*;

use crate::errors::{Result, TileSegError};

/// Per-observation feature matrix; rows are observations.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    values: Array2<f32>,
    columns: Option<Vec<String>>,
}

impl FeatureMatrix {
    /// Matrix whose columns are addressed by index.
    pub const fn new(values: Array2<f32>) -> Self {
        Self {
            values,
            columns: None,
        }
    }

    pub fn named(values: Array2<f32>, columns: Vec<String>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(TileSegError::validation(
                "columns",
                format!("has {} names for {} columns", columns.len(), values.ncols()),
            ));
        }
        Ok(Self {
            values,
            columns: Some(columns),
        })
    }

    pub const fn values(&self) -> &Array2<f32> {
        &self.values
    }

    fn column_name(&self, index: usize) -> String {
        self.columns
            .as_ref()
            .map_or_else(|| index.to_string(), |names| names[index].clone())
    }
}

/// Observation table with multi-column entries (`obsm`) and single
/// columns (`obs`).
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub obsm: BTreeMap<String, FeatureMatrix>,
    pub obs: BTreeMap<String, Array1<f32>>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_obsm(mut self, key: impl Into<String>, matrix: FeatureMatrix) -> Self {
        self.obsm.insert(key.into(), matrix);
        self
    }
}

/// Copy of `table` with the columns of each `obsm_keys` entry moved into
/// `obs` for plotting.
///
/// Columns are named `<prefix>_<column>`, or just `<column>` when `prefixes`
/// is empty. Unnamed matrices use the column index. A single prefix applies
/// to every key; otherwise there must be one prefix per key. Existing `obs`
/// columns are overwritten with a warning.
pub fn extract(table: &FeatureTable, obsm_keys: &[&str], prefixes: &[&str]) -> Result<FeatureTable> {
    let prefixes: Vec<String> = match prefixes {
        [] => vec![String::new(); obsm_keys.len()],
        [single] => vec![format!("{single}_"); obsm_keys.len()],
        many if many.len() == obsm_keys.len() => many.iter().map(|p| format!("{p}_")).collect(),
        many => {
            return Err(TileSegError::validation(
                "prefix",
                format!(
                    "length {} does not fit length of obsm keys {}",
                    many.len(),
                    obsm_keys.len()
                ),
            ))
        }
    };

    let mut out = table.clone();
    for (key, prefix) in obsm_keys.iter().zip(&prefixes) {
        let matrix = table
            .obsm
            .get(*key)
            .ok_or_else(|| TileSegError::validation("obsm key", format!("`{key}` is not in the table")))?;

        for (index, column) in matrix.values.columns().into_iter().enumerate() {
            let obs_key = format!("{prefix}{}", matrix.column_name(index));
            if out.obs.contains_key(&obs_key) {
                warn!("{obs_key} in obs will be overwritten by extract");
            }
            out.obs.insert(obs_key, column.to_owned());
        }
    }
    Ok(out)
}

/// Black or white, whichever reads better on an `(r, g, b)` background.
pub fn contrasting_color(r: u8, g: u8, b: u8) -> &'static str {
    let luminance = f32::from(r) * 0.299 + f32::from(g) * 0.587 + f32::from(b) * 0.114;
    if luminance > 186.0 {
        "#000000"
    } else {
        "#ffffff"
    }
}

/// Text color for `value` drawn with `colormap`; `value` must lie in [0, 1].
pub fn black_or_white<F>(value: f32, colormap: F) -> Result<&'static str>
where
    F: Fn(f32) -> [f32; 3],
{
    if !(0.0..=1.0).contains(&value) {
        return Err(TileSegError::validation(
            "value",
            format!("must be in range [0, 1], found {value}"),
        ));
    }
    let [r, g, b] = colormap(value).map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8);
    Ok(contrasting_color(r, g, b))
}

/// Append `.ext` when `path` has no extension and root relative paths at
/// `figure_dir`.
pub fn resolve_figure_path(path: &Path, ext: &str, figure_dir: &Path) -> PathBuf {
    let path = if path.extension().is_none() {
        path.with_extension(ext)
    } else {
        path.to_path_buf()
    };
    if path.is_absolute() {
        path
    } else {
        figure_dir.join(path)
    }
}

/// Deterministic color of a label: golden-angle hue steps at fixed
/// saturation and value.
fn label_color(label: u32) -> Rgb<u8> {
    let hue = (label as f32 * 137.507_77) % 360.0;
    let (s, v) = (0.65f32, 0.95f32);
    let c = v * s;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    Rgb([r, g, b].map(|ch| ((ch + m) * 255.0).round() as u8))
}

/// Render a label map for display; background stays black.
pub fn colorize_labels(labels: ArrayView2<u32>) -> RgbImage {
    let (height, width) = labels.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        match labels[[y as usize, x as usize]] {
            0 => Rgb([0, 0, 0]),
            label => label_color(label),
        }
    })
}

/// Save a rendered figure, resolving its path like [`resolve_figure_path`].
pub fn save_figure(
    figure: &RgbImage,
    path: &Path,
    ext: &str,
    figure_dir: &Path,
    make_dir: bool,
) -> Result<PathBuf> {
    let path = resolve_figure_path(path, ext, figure_dir);

    if make_dir {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                debug!("unable to create directory {}: {e}", parent.display());
            }
        }
    }

    debug!("saving figure to {}", path.display());
    figure.save(&path).map_err(|e| TileSegError::ImageProcessing {
        path: path.display().to_string(),
        operation: "figure save".to_string(),
        source: Box::new(e),
    })?;
    Ok(path)
}
