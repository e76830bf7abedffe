use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::Luma;
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::prelude::*;

use crate::imageops::{from_luma_image, peaks::local_maxima, to_luma_image};

const PEAK_FOOTPRINT: usize = 5;

/// Marker-based watershed of a single plane.
///
/// Pixels selected by the threshold (`>=` when `geq`, `<` otherwise) act as
/// the barrier; everything else is segmented. Seeds are the local maxima of
/// the distance to the barrier, and flooding follows the inverted intensity
/// so bright pixels are reached first.
pub fn segment_watershed(plane: &Array2<f32>, threshold: f32, geq: bool) -> Array2<u32> {
    let barrier = plane.mapv(|v| if geq { v >= threshold } else { v < threshold });
    let region = barrier.mapv(|b| !b);

    if !region.iter().any(|&r| r) {
        return Array2::zeros(plane.raw_dim());
    }
    if !barrier.iter().any(|&b| b) {
        // no barrier to measure distance from: the whole plane is one basin
        return Array2::from_elem(plane.raw_dim(), 1);
    }

    let distance = distance_to_barrier(&barrier);
    let seeds = local_maxima(distance.view(), region.view(), PEAK_FOOTPRINT, 0.0);
    let markers = label_components(&seeds);

    flood(plane, &markers, &region)
}

fn distance_to_barrier(barrier: &Array2<bool>) -> Array2<f64> {
    let binary = barrier.mapv(|b| if b { u8::MAX } else { 0 });
    let squared = euclidean_squared_distance_transform(&to_luma_image::<u8, u8>(binary.view()));
    from_luma_image::<f64, f64>(&squared).mapv(f64::sqrt)
}

/// 4-connected labeling, numbered densely from 1.
fn label_components(mask: &Array2<bool>) -> Array2<u32> {
    let binary = mask.mapv(|m| if m { u8::MAX } else { 0 });
    let labeled = connected_components(
        &to_luma_image::<u8, u8>(binary.view()),
        Connectivity::Four,
        Luma([0u8]),
    );
    from_luma_image(&labeled)
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    level: f32,
    order: u64,
    y: usize,
    x: usize,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // min-heap on (level, order)
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .level
            .total_cmp(&self.level)
            .then_with(|| other.order.cmp(&self.order))
    }
}

fn flood(plane: &Array2<f32>, markers: &Array2<u32>, region: &Array2<bool>) -> Array2<u32> {
    let (height, width) = plane.dim();
    let level = |y: usize, x: usize| 255.0 - plane[[y, x]];

    let mut labels = Array2::<u32>::zeros((height, width));
    let mut heap = BinaryHeap::new();
    let mut order = 0u64;

    for ((y, x), &marker) in markers.indexed_iter() {
        if marker > 0 && region[[y, x]] {
            labels[[y, x]] = marker;
            heap.push(Entry {
                level: level(y, x),
                order,
                y,
                x,
            });
            order += 1;
        }
    }

    while let Some(Entry { y, x, .. }) = heap.pop() {
        let label = labels[[y, x]];
        let neighbours = [
            (y.wrapping_sub(1), x),
            (y + 1, x),
            (y, x.wrapping_sub(1)),
            (y, x + 1),
        ];
        for (ny, nx) in neighbours {
            if ny >= height || nx >= width || !region[[ny, nx]] || labels[[ny, nx]] != 0 {
                continue;
            }
            labels[[ny, nx]] = label;
            heap.push(Entry {
                level: level(ny, nx),
                order,
                y: ny,
                x: nx,
            });
            order += 1;
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two dark squares on a bright background.
    fn two_nuclei() -> Array2<f32> {
        let mut plane = Array2::from_elem((20, 30), 1.0f32);
        plane.slice_mut(s![4..12, 3..11]).fill(0.1);
        plane.slice_mut(s![6..16, 17..27]).fill(0.2);
        plane
    }

    #[test]
    fn test_separates_disjoint_regions() {
        let labels = segment_watershed(&two_nuclei(), 0.5, true);

        let left = labels[[8, 7]];
        let right = labels[[11, 22]];
        assert!(left > 0 && right > 0);
        assert_ne!(left, right);
        assert_eq!(labels[[0, 0]], 0);
        assert_eq!(labels[[18, 29]], 0);
        assert!(labels.slice(s![4..12, 3..11]).iter().all(|&v| v == left));
    }

    #[test]
    fn test_lower_bound_mode_inverts_selection() {
        let plane = two_nuclei();
        let labels = segment_watershed(&plane, 0.5, false);

        assert_eq!(labels[[8, 7]], 0);
        assert_ne!(labels[[0, 0]], 0);
    }

    #[test]
    fn test_threshold_equality_is_barrier_only_with_geq() {
        let plane = array![[0.2f32, 0.5, 0.9]];

        let geq = segment_watershed(&plane, 0.5, true);
        assert_eq!(geq, array![[1, 0, 0]]);

        let lt = segment_watershed(&plane, 0.5, false);
        assert_eq!(lt[[0, 0]], 0);
        assert_ne!(lt[[0, 1]], 0);
        assert_eq!(lt[[0, 1]], lt[[0, 2]]);
    }

    #[test]
    fn test_is_deterministic() {
        let mut plane = two_nuclei();
        plane[[9, 8]] = 0.05;
        let first = segment_watershed(&plane, 0.5, true);
        let second = segment_watershed(&plane, 0.5, true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_degenerate_planes() {
        let bright = Array2::from_elem((4, 4), 1.0f32);
        assert!(segment_watershed(&bright, 0.5, true).iter().all(|&v| v == 0));

        let dark = Array2::from_elem((4, 4), 0.0f32);
        assert!(segment_watershed(&dark, 0.5, true).iter().all(|&v| v == 1));
    }

    #[test]
    fn test_labels_are_dense() {
        let labels = segment_watershed(&two_nuclei(), 0.5, true);
        let mut seen: Vec<u32> = labels.iter().copied().filter(|&v| v > 0).collect();
        seen.sort_unstable();
        seen.dedup();
        let expected: Vec<u32> = (1..=seen.len() as u32).collect();
        assert_eq!(seen, expected);
    }
}
