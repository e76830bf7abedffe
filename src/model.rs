use std::path::Path;

use log::debug;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::errors::{Result, TileSegError};
use crate::traits::LabelPredictor;

/// ONNX label model for the pretrained backend.
///
/// The network takes a `(1, channels, height, width)` float tensor and
/// returns one value per pixel; values are rounded into labels.
pub struct OnnxModel {
    name: String,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| TileSegError::Model {
                operation: "session builder init".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| TileSegError::Model {
                operation: "execution provider setup".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| TileSegError::Model {
                operation: format!("model load: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| TileSegError::configuration("model declares no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| TileSegError::configuration("model declares no outputs"))?;

        debug!(
            "loaded {} (input `{input_name}`, output `{output_name}`)",
            model_path.display()
        );

        Ok(Self {
            name: model_path.display().to_string(),
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl LabelPredictor for OnnxModel {
    fn predict(&self, tile: ArrayView3<f32>) -> Result<Array2<u32>> {
        let (_, height, width) = tile.dim();
        let batch = tile.insert_axis(Axis(0));

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&batch.as_standard_layout())?
        ])?;
        let raw = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;

        let plane = raw
            .iter()
            .map(|v| v.round().to_u32().unwrap_or(0))
            .collect::<Vec<_>>();
        Ok(Array2::from_shape_vec((height, width), plane)?)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
