use ndarray::prelude::*;

/// Mark pixels that equal the maximum of their `footprint` x `footprint`
/// neighbourhood.
///
/// Only pixels where `region` is set take part, both as candidates and as
/// neighbours, and a peak must lie strictly above `floor`. Plateaus yield
/// every pixel of the plateau; callers merge them by connected labeling.
pub fn local_maxima(
    values: ArrayView2<f64>,
    region: ArrayView2<bool>,
    footprint: usize,
    floor: f64,
) -> Array2<bool> {
    let (height, width) = values.dim();
    let radius = footprint / 2;

    Array2::from_shape_fn((height, width), |(y, x)| {
        let value = values[[y, x]];
        if !region[[y, x]] || value <= floor {
            return false;
        }

        let ys = y.saturating_sub(radius)..(y + radius + 1).min(height);
        let xs = x.saturating_sub(radius)..(x + radius + 1).min(width);
        values
            .slice(s![ys.clone(), xs.clone()])
            .indexed_iter()
            .all(|((dy, dx), &other)| !region[[ys.start + dy, xs.start + dx]] || other <= value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_peak() {
        let values = array![
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 3.0, 1.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
        ];
        let region = Array2::from_elem(values.raw_dim(), true);
        let peaks = local_maxima(values.view(), region.view(), 5, 0.0);

        assert_eq!(peaks.iter().filter(|&&p| p).count(), 1);
        assert!(peaks[[1, 1]]);
    }

    #[test]
    fn test_region_restricts_candidates() {
        let values = array![[1.0, 5.0, 1.0, 1.0, 1.0, 1.0, 2.0]];
        let mut region = Array2::from_elem(values.raw_dim(), true);
        region[[0, 1]] = false;
        let peaks = local_maxima(values.view(), region.view(), 5, 0.0);

        assert!(!peaks[[0, 1]]);
        assert!(peaks[[0, 6]]);
        assert!(peaks[[0, 0]]);
    }

    #[test]
    fn test_floor_excludes_background() {
        let values = Array2::<f64>::zeros((3, 3));
        let region = Array2::from_elem((3, 3), true);
        let peaks = local_maxima(values.view(), region.view(), 5, 0.0);
        assert!(peaks.iter().all(|&p| !p));
    }
}
