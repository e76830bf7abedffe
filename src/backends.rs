pub mod blob;
pub mod watershed;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use ndarray::prelude::*;

use crate::errors::{Result, TileSegError};
use crate::imageops::mean_plane;
use crate::traits::LabelPredictor;

pub use blob::{BlobAlgorithm, BlobParams, BlobSettings};

/// Backend family selected by name at the dispatch entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFamily {
    SkimageBlob,
    Watershed,
    Tensorflow,
}

impl BackendFamily {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SkimageBlob => "skimage_blob",
            Self::Watershed => "watershed",
            Self::Tensorflow => "tensorflow",
        }
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendFamily {
    type Err = TileSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skimage_blob" | "blob" => Ok(Self::SkimageBlob),
            "watershed" => Ok(Self::Watershed),
            "tensorflow" | "pretrained" => Ok(Self::Tensorflow),
            _ => Err(TileSegError::configuration(format!(
                "did not recognize backend family `{s}`"
            ))),
        }
    }
}

/// Backend-specific model handle: an algorithm name or a loaded predictor.
#[derive(Clone, Default)]
pub enum ModelInstance {
    #[default]
    None,
    Name(String),
    Predictor(Arc<dyn LabelPredictor>),
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Predictor(p) => f.debug_tuple("Predictor").field(&p.name()).finish(),
        }
    }
}

impl From<&str> for ModelInstance {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ModelInstance {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Arc<dyn LabelPredictor>> for ModelInstance {
    fn from(predictor: Arc<dyn LabelPredictor>) -> Self {
        Self::Predictor(predictor)
    }
}

/// Keyword parameters handed to the backend. Each backend reads the fields
/// it understands and ignores the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelKwargs {
    /// Blob: negate intensities so dark nuclei become bright blobs.
    pub invert: bool,
    /// Watershed: binarization threshold.
    pub threshold: f32,
    /// Watershed: `pixel >= threshold` when set, `pixel < threshold` otherwise.
    pub geq: bool,
    pub blob: BlobParams,
}

impl Default for ModelKwargs {
    fn default() -> Self {
        Self {
            invert: true,
            threshold: 0.5,
            geq: true,
            blob: BlobParams::default(),
        }
    }
}

/// A configured segmentation backend. Immutable once built.
#[derive(Clone)]
pub enum SegmentationModel {
    Blob {
        algorithm: BlobAlgorithm,
        settings: BlobSettings,
        invert: bool,
    },
    Watershed {
        threshold: f32,
        geq: bool,
    },
    Pretrained {
        handle: Arc<dyn LabelPredictor>,
    },
}

impl fmt::Debug for SegmentationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blob {
                algorithm,
                settings,
                invert,
            } => f
                .debug_struct("Blob")
                .field("algorithm", algorithm)
                .field("settings", settings)
                .field("invert", invert)
                .finish(),
            Self::Watershed { threshold, geq } => f
                .debug_struct("Watershed")
                .field("threshold", threshold)
                .field("geq", geq)
                .finish(),
            Self::Pretrained { handle } => f
                .debug_struct("Pretrained")
                .field("handle", &handle.name())
                .finish(),
        }
    }
}

impl SegmentationModel {
    pub fn from_family(
        family: BackendFamily,
        instance: ModelInstance,
        kwargs: &ModelKwargs,
    ) -> Result<Self> {
        match family {
            BackendFamily::SkimageBlob => match instance {
                ModelInstance::Name(name) => Self::blob(&name, kwargs),
                other => Err(TileSegError::configuration(format!(
                    "blob detection needs an algorithm name (log, dog, doh), got {other:?}"
                ))),
            },
            BackendFamily::Watershed => {
                if !matches!(instance, ModelInstance::None) {
                    debug!("watershed ignores model instance {instance:?}");
                }
                Ok(Self::watershed(kwargs.threshold, kwargs.geq))
            }
            BackendFamily::Tensorflow => Self::pretrained(instance),
        }
    }

    pub fn blob(algorithm: &str, kwargs: &ModelKwargs) -> Result<Self> {
        let algorithm: BlobAlgorithm = algorithm.parse()?;
        let settings = kwargs.blob.resolve(algorithm)?;
        Ok(Self::Blob {
            algorithm,
            settings,
            invert: kwargs.invert,
        })
    }

    pub const fn watershed(threshold: f32, geq: bool) -> Self {
        Self::Watershed { threshold, geq }
    }

    pub fn pretrained(instance: ModelInstance) -> Result<Self> {
        match instance {
            ModelInstance::Predictor(handle) => Ok(Self::Pretrained { handle }),
            other => Err(TileSegError::configuration(format!(
                "pretrained segmentation needs a loaded label predictor, got {other:?}"
            ))),
        }
    }

    /// Segment one (channel, y, x) array into a (y, x) label mask.
    pub fn segment(&self, arr: ArrayView3<f32>) -> Result<Array2<u32>> {
        match self {
            Self::Blob {
                algorithm,
                settings,
                invert,
            } => {
                let mut plane = mean_plane(arr);
                if *invert {
                    plane.mapv_inplace(|v| -v);
                }
                Ok(blob::segment_blobs(&plane, *algorithm, settings))
            }
            Self::Watershed { threshold, geq } => Ok(watershed::segment_watershed(
                &mean_plane(arr),
                *threshold,
                *geq,
            )),
            Self::Pretrained { handle } => handle.predict(arr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockLabelPredictor;

    #[test]
    fn test_family_parsing() {
        assert_eq!(
            "skimage_blob".parse::<BackendFamily>().unwrap(),
            BackendFamily::SkimageBlob
        );
        assert_eq!(
            "Watershed".parse::<BackendFamily>().unwrap(),
            BackendFamily::Watershed
        );
        assert_eq!(
            "tensorflow".parse::<BackendFamily>().unwrap(),
            BackendFamily::Tensorflow
        );
        assert!(matches!(
            "nonexistent".parse::<BackendFamily>(),
            Err(TileSegError::Configuration { .. })
        ));
    }

    #[test]
    fn test_unknown_blob_algorithm() {
        let err = SegmentationModel::from_family(
            BackendFamily::SkimageBlob,
            "hough".into(),
            &ModelKwargs::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TileSegError::Configuration { .. }));
    }

    #[test]
    fn test_pretrained_rejects_named_instance() {
        let err = SegmentationModel::from_family(
            BackendFamily::Tensorflow,
            "model.onnx".into(),
            &ModelKwargs::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TileSegError::Configuration { .. }));
    }

    #[test]
    fn test_pretrained_passes_output_through() {
        let predictor: Arc<dyn LabelPredictor> = Arc::new(MockLabelPredictor::constant(7));
        let model = SegmentationModel::pretrained(predictor.into()).unwrap();

        let mask = model.segment(Array3::zeros((3, 2, 4)).view()).unwrap();
        assert_eq!(mask, Array2::from_elem((2, 4), 7));
    }

    #[test]
    fn test_watershed_ignores_instance() {
        let model = SegmentationModel::from_family(
            BackendFamily::Watershed,
            "anything".into(),
            &ModelKwargs::default(),
        )
        .unwrap();
        assert!(matches!(
            model,
            SegmentationModel::Watershed {
                threshold,
                geq: true
            } if threshold == 0.5
        ));
    }
}
