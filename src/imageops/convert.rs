use image::{ImageBuffer, Luma, Primitive};
use ndarray::prelude::*;
use num_traits::AsPrimitive;

/// Collapse a (channel, y, x) array into one plane by the per-pixel mean.
pub fn mean_plane(arr: ArrayView3<f32>) -> Array2<f32> {
    match arr.dim().0 {
        0 => Array2::zeros((arr.dim().1, arr.dim().2)),
        1 => arr.index_axis(Axis(0), 0).to_owned(),
        _ => arr
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array2::zeros((arr.dim().1, arr.dim().2))),
    }
}

/// Min-max scale a plane into [0, 1]. Flat planes become all zeros.
pub fn normalize(plane: &Array2<f32>) -> Array2<f32> {
    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        return Array2::zeros(plane.raw_dim());
    }
    plane.mapv(|v| (v - min) / range)
}

pub fn to_luma_image<S, T>(plane: ArrayView2<T>) -> ImageBuffer<Luma<S>, Vec<S>>
where
    S: Primitive + 'static,
    T: AsPrimitive<S>,
{
    let (height, width) = plane.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        Luma([plane[[y as usize, x as usize]].as_()])
    })
}

pub fn from_luma_image<S, T>(image: &ImageBuffer<Luma<S>, Vec<S>>) -> Array2<T>
where
    S: Primitive + AsPrimitive<T>,
    T: Copy + 'static,
{
    let (width, height) = image.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        image.get_pixel(x as u32, y as u32).0[0].as_()
    })
}
