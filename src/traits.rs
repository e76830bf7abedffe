use crate::errors::Result;
use ndarray::prelude::*;

/// A pretrained model that turns one image tile into a label mask.
///
/// Implementations receive the tile as (channel, y, x) and return a
/// (y, x) mask. The output is passed through untouched, so keeping it the
/// size of the tile is the implementation's responsibility.
pub trait LabelPredictor: Send + Sync {
    fn predict(&self, tile: ArrayView3<f32>) -> Result<Array2<u32>>;

    /// Short name used in log messages.
    fn name(&self) -> &str {
        "predictor"
    }
}
