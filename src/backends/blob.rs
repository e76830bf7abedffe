//! Scale-space blob detection (Laplacian of Gaussian, Difference of
//! Gaussian, Determinant of Hessian) rasterized into a label mask.

use std::str::FromStr;

use image::imageops;
use ndarray::prelude::*;

use crate::errors::{Result, TileSegError};
use crate::imageops::{from_luma_image, normalize, to_luma_image};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobAlgorithm {
    Log,
    Dog,
    Doh,
}

impl FromStr for BlobAlgorithm {
    type Err = TileSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "dog" => Ok(Self::Dog),
            "doh" => Ok(Self::Doh),
            _ => Err(TileSegError::configuration(format!(
                "did not recognize blob algorithm `{s}`"
            ))),
        }
    }
}

/// Optional detector parameters; unset fields take per-algorithm defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobParams {
    pub min_sigma: Option<f32>,
    pub max_sigma: Option<f32>,
    pub num_sigma: Option<usize>,
    pub sigma_ratio: Option<f32>,
    pub threshold: Option<f32>,
}

/// Fully resolved detector parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobSettings {
    pub min_sigma: f32,
    pub max_sigma: f32,
    pub num_sigma: usize,
    pub sigma_ratio: f32,
    pub threshold: f32,
}

impl BlobParams {
    pub fn resolve(&self, algorithm: BlobAlgorithm) -> Result<BlobSettings> {
        let (max_sigma, threshold) = match algorithm {
            BlobAlgorithm::Log => (50.0, 0.2),
            BlobAlgorithm::Dog => (50.0, 0.5),
            BlobAlgorithm::Doh => (30.0, 0.01),
        };
        let settings = BlobSettings {
            min_sigma: self.min_sigma.unwrap_or(1.0),
            max_sigma: self.max_sigma.unwrap_or(max_sigma),
            num_sigma: self.num_sigma.unwrap_or(10),
            sigma_ratio: self.sigma_ratio.unwrap_or(1.6),
            threshold: self.threshold.unwrap_or(threshold),
        };

        if !(settings.min_sigma > 0.0 && settings.max_sigma >= settings.min_sigma) {
            return Err(TileSegError::configuration(format!(
                "blob sigmas must satisfy 0 < min_sigma <= max_sigma, got {} and {}",
                settings.min_sigma, settings.max_sigma
            )));
        }
        if settings.num_sigma == 0 {
            return Err(TileSegError::configuration("num_sigma must be positive"));
        }
        if settings.sigma_ratio <= 1.0 {
            return Err(TileSegError::configuration(format!(
                "sigma_ratio must exceed 1, got {}",
                settings.sigma_ratio
            )));
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub y: usize,
    pub x: usize,
    pub radius: f32,
    pub response: f32,
}

/// Detect blobs in `plane` and paint them as discs numbered 1..k.
///
/// Stronger blobs are painted first and keep their pixels.
pub fn segment_blobs(plane: &Array2<f32>, algorithm: BlobAlgorithm, settings: &BlobSettings) -> Array2<u32> {
    let blobs = detect(plane, algorithm, settings);
    rasterize(&blobs, plane.dim())
}

pub fn detect(plane: &Array2<f32>, algorithm: BlobAlgorithm, settings: &BlobSettings) -> Vec<Blob> {
    if plane.is_empty() {
        return Vec::new();
    }
    // blurring clamps to the [0, 1] range of f32 pixels
    let plane = normalize(plane);
    let (sigmas, cube) = match algorithm {
        BlobAlgorithm::Log => {
            let sigmas = linspace(settings.min_sigma, settings.max_sigma, settings.num_sigma);
            let cube = sigmas
                .iter()
                .map(|&sigma| laplacian(&gaussian(&plane, sigma)).mapv(|v| -v * sigma * sigma))
                .collect::<Vec<_>>();
            (sigmas, cube)
        }
        BlobAlgorithm::Dog => {
            let steps = ((settings.max_sigma / settings.min_sigma).ln()
                / settings.sigma_ratio.ln())
            .floor() as usize
                + 1;
            let all_sigmas = (0..=steps)
                .map(|i| settings.min_sigma * settings.sigma_ratio.powi(i as i32))
                .collect::<Vec<_>>();
            let blurred = all_sigmas
                .iter()
                .map(|&sigma| gaussian(&plane, sigma))
                .collect::<Vec<_>>();
            let scale = 1.0 / (settings.sigma_ratio - 1.0);
            let cube = blurred
                .windows(2)
                .map(|pair| (&pair[0] - &pair[1]).mapv(|v| v * scale))
                .collect::<Vec<_>>();
            (all_sigmas[..steps].to_vec(), cube)
        }
        BlobAlgorithm::Doh => {
            let sigmas = linspace(settings.min_sigma, settings.max_sigma, settings.num_sigma);
            let cube = sigmas
                .iter()
                .map(|&sigma| hessian_determinant(&gaussian(&plane, sigma)).mapv(|v| v * sigma.powi(4)))
                .collect::<Vec<_>>();
            (sigmas, cube)
        }
    };

    let radius_factor = match algorithm {
        BlobAlgorithm::Log | BlobAlgorithm::Dog => std::f32::consts::SQRT_2,
        BlobAlgorithm::Doh => 1.0,
    };

    let mut blobs = scale_space_peaks(&cube, settings.threshold)
        .into_iter()
        .map(|(s, y, x)| Blob {
            y,
            x,
            radius: sigmas[s] * radius_factor,
            response: cube[s][[y, x]],
        })
        .collect::<Vec<_>>();

    // stable sort keeps scan order between equal responses
    blobs.sort_by(|a, b| b.response.total_cmp(&a.response));
    prune(blobs)
}

/// Drop blobs whose centre lies inside an already accepted, stronger blob.
fn prune(blobs: Vec<Blob>) -> Vec<Blob> {
    let mut kept: Vec<Blob> = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let covered = kept.iter().any(|k| {
            let dy = k.y as f32 - blob.y as f32;
            let dx = k.x as f32 - blob.x as f32;
            dy * dy + dx * dx <= k.radius * k.radius
        });
        if !covered {
            kept.push(blob);
        }
    }
    kept
}

pub fn rasterize(blobs: &[Blob], shape: (usize, usize)) -> Array2<u32> {
    let (height, width) = shape;
    let mut labels = Array2::<u32>::zeros(shape);

    for (label, blob) in (1u32..).zip(blobs) {
        let reach = blob.radius.ceil() as usize;
        let r2 = blob.radius * blob.radius;
        for y in blob.y.saturating_sub(reach)..(blob.y + reach + 1).min(height) {
            for x in blob.x.saturating_sub(reach)..(blob.x + reach + 1).min(width) {
                let dy = y as f32 - blob.y as f32;
                let dx = x as f32 - blob.x as f32;
                if dy * dy + dx * dx <= r2 && labels[[y, x]] == 0 {
                    labels[[y, x]] = label;
                }
            }
        }
    }
    labels
}

fn linspace(start: f32, stop: f32, num: usize) -> Vec<f32> {
    if num <= 1 {
        return vec![start];
    }
    let step = (stop - start) / (num - 1) as f32;
    (0..num).map(|i| start + step * i as f32).collect()
}

/// Gaussian blur with edge replication. The plane is padded by 4σ of
/// replicated border before blurring, so scales wider than the tile tend to
/// the local mean instead of fading to zero.
fn gaussian(plane: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let (height, width) = plane.dim();
    if height == 0 || width == 0 {
        return plane.clone();
    }
    let pad = (4.0 * sigma).ceil() as usize;
    let padded = Array2::from_shape_fn((height + 2 * pad, width + 2 * pad), |(y, x)| {
        at(plane, y as isize - pad as isize, x as isize - pad as isize)
    });
    let image = to_luma_image::<f32, f32>(padded.view());
    let blurred: Array2<f32> = from_luma_image(&imageops::blur(&image, sigma));
    blurred.slice(s![pad..pad + height, pad..pad + width]).to_owned()
}

/// Sample with edge replication.
fn at(plane: &Array2<f32>, y: isize, x: isize) -> f32 {
    let (height, width) = plane.dim();
    let y = y.clamp(0, height as isize - 1) as usize;
    let x = x.clamp(0, width as isize - 1) as usize;
    plane[[y, x]]
}

fn laplacian(plane: &Array2<f32>) -> Array2<f32> {
    Array2::from_shape_fn(plane.dim(), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        at(plane, y - 1, x) + at(plane, y + 1, x) + at(plane, y, x - 1) + at(plane, y, x + 1)
            - 4.0 * at(plane, y, x)
    })
}

fn hessian_determinant(plane: &Array2<f32>) -> Array2<f32> {
    Array2::from_shape_fn(plane.dim(), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        let centre = at(plane, y, x);
        let hxx = at(plane, y, x + 1) - 2.0 * centre + at(plane, y, x - 1);
        let hyy = at(plane, y + 1, x) - 2.0 * centre + at(plane, y - 1, x);
        let hxy = (at(plane, y + 1, x + 1) - at(plane, y + 1, x - 1) - at(plane, y - 1, x + 1)
            + at(plane, y - 1, x - 1))
            / 4.0;
        hxx * hyy - hxy * hxy
    })
}

/// Points of the (scale, y, x) cube above `threshold` that are not exceeded
/// by any of their 26 neighbours, in scan order.
fn scale_space_peaks(cube: &[Array2<f32>], threshold: f32) -> Vec<(usize, usize, usize)> {
    let Some((height, width)) = cube.first().map(|layer| layer.dim()) else {
        return Vec::new();
    };
    let mut peaks = Vec::new();

    for (s, layer) in cube.iter().enumerate() {
        for ((y, x), &value) in layer.indexed_iter() {
            if value <= threshold {
                continue;
            }
            let is_peak = (s.saturating_sub(1)..(s + 2).min(cube.len())).all(|ns| {
                (y.saturating_sub(1)..(y + 2).min(height)).all(|ny| {
                    (x.saturating_sub(1)..(x + 2).min(width)).all(|nx| cube[ns][[ny, nx]] <= value)
                })
            });
            if is_peak {
                peaks.push((s, y, x));
            }
        }
    }
    peaks
}
