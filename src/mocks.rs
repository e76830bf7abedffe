use crate::errors::{Result, TileSegError};
use crate::traits::LabelPredictor;
use ndarray::prelude::*;

#[derive(Debug, Clone)]
enum Behaviour {
    Constant(u32),
    Intensity,
    Fail,
}

/// Test double for the pretrained backend.
#[derive(Debug, Clone)]
pub struct MockLabelPredictor {
    behaviour: Behaviour,
}

impl MockLabelPredictor {
    /// Every pixel gets `label`.
    pub const fn constant(label: u32) -> Self {
        Self {
            behaviour: Behaviour::Constant(label),
        }
    }

    /// Labels are read from the first channel of the tile, so tests can
    /// paint the expected per-tile labels straight into the image.
    pub const fn from_intensity() -> Self {
        Self {
            behaviour: Behaviour::Intensity,
        }
    }

    /// Every call fails with a model error.
    pub const fn failing() -> Self {
        Self {
            behaviour: Behaviour::Fail,
        }
    }
}

impl LabelPredictor for MockLabelPredictor {
    fn predict(&self, tile: ArrayView3<f32>) -> Result<Array2<u32>> {
        let (_, height, width) = tile.dim();
        match self.behaviour {
            Behaviour::Constant(label) => Ok(Array2::from_elem((height, width), label)),
            Behaviour::Intensity => Ok(tile.index_axis(Axis(0), 0).mapv(|v| v.max(0.0) as u32)),
            Behaviour::Fail => Err(TileSegError::Model {
                operation: "mock prediction".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "mock predictor failure",
                )),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_shapes() -> Result<()> {
        let tile = Array3::<f32>::from_elem((2, 3, 5), 4.0);

        assert_eq!(
            MockLabelPredictor::constant(1).predict(tile.view())?,
            Array2::from_elem((3, 5), 1)
        );
        assert_eq!(
            MockLabelPredictor::from_intensity().predict(tile.view())?,
            Array2::from_elem((3, 5), 4)
        );
        assert!(MockLabelPredictor::failing().predict(tile.view()).is_err());
        Ok(())
    }
}
