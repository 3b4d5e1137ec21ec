//! Downsamples an `OccupancyMap` into a three-valued [`PlanningGrid`] by
//! tile-averaging. Pure function, no hidden state: the same input bytes
//! always produce the same labels.

use rovercore_types::{CellLabel, PlanningGrid};

/// Byte thresholds separating FREE/BLOCKED/UNKNOWN. Exposed as
/// configuration rather than hard-coded, per the open question this
/// resolves.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoarseGridThresholds {
    pub free_above: u8,
    pub blocked_below: u8,
}

impl Default for CoarseGridThresholds {
    fn default() -> Self {
        Self {
            free_above: 200,
            blocked_below: 25,
        }
    }
}

/// Compute the cell size in pixels for a `map_pixels`-wide map covering
/// `map_meters`, targeting a 0.25 m cell.
pub fn cell_px(map_meters: f64, map_pixels: u32) -> u32 {
    let px = (0.25 * map_pixels as f64 / map_meters).round();
    (px as u32).max(1)
}

/// Tile-average `map_bytes` (a `map_pixels * map_pixels` raster) into a
/// [`PlanningGrid`].
pub fn coarsen(
    map_bytes: &[u8],
    map_meters: f64,
    map_pixels: u32,
    thresholds: CoarseGridThresholds,
) -> PlanningGrid {
    let cell_px = cell_px(map_meters, map_pixels);
    let side_cells = map_pixels.div_ceil(cell_px);

    let mut labels = Vec::with_capacity((side_cells as usize) * (side_cells as usize));
    for cy in 0..side_cells {
        for cx in 0..side_cells {
            let x0 = cx * cell_px;
            let y0 = cy * cell_px;
            let x1 = (x0 + cell_px).min(map_pixels);
            let y1 = (y0 + cell_px).min(map_pixels);

            let mut sum: u64 = 0;
            let mut count: u64 = 0;
            for y in y0..y1 {
                let row_start = (y as usize) * (map_pixels as usize);
                for x in x0..x1 {
                    sum += map_bytes[row_start + x as usize] as u64;
                    count += 1;
                }
            }
            let avg = if count > 0 { sum as f64 / count as f64 } else { 255.0 };

            let label = if avg > thresholds.free_above as f64 {
                CellLabel::Free
            } else if avg < thresholds.blocked_below as f64 {
                CellLabel::Blocked
            } else {
                CellLabel::Unknown
            };
            labels.push(label);
        }
    }

    PlanningGrid { side_cells, cell_px, labels }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_px_matches_quarter_metre_tiles() {
        // 800 px over 15 m -> 0.25m tile is 13.33px, rounds to 13.
        assert_eq!(cell_px(15.0, 800), 13);
    }

    #[test]
    fn cell_px_never_goes_below_one() {
        assert_eq!(cell_px(1000.0, 4), 1);
    }

    #[test]
    fn coarsen_labels_uniform_free_map_as_free() {
        let bytes = vec![255u8; 16];
        let grid = coarsen(&bytes, 0.04, 4, CoarseGridThresholds::default());
        assert!(grid.labels.iter().all(|&l| l == CellLabel::Free));
    }

    #[test]
    fn coarsen_labels_uniform_blocked_map_as_blocked() {
        let bytes = vec![0u8; 16];
        let grid = coarsen(&bytes, 0.04, 4, CoarseGridThresholds::default());
        assert!(grid.labels.iter().all(|&l| l == CellLabel::Blocked));
    }

    #[test]
    fn coarsen_labels_midrange_bytes_as_unknown() {
        let bytes = vec![100u8; 16];
        let grid = coarsen(&bytes, 0.04, 4, CoarseGridThresholds::default());
        assert!(grid.labels.iter().all(|&l| l == CellLabel::Unknown));
    }

    #[test]
    fn coarsen_dimensions_match_ceil_division() {
        let bytes = vec![255u8; 800 * 800];
        let grid = coarsen(&bytes, 15.0, 800, CoarseGridThresholds::default());
        let expected_side = 800u32.div_ceil(13);
        assert_eq!(grid.side_cells, expected_side);
        assert_eq!(grid.labels.len(), (expected_side * expected_side) as usize);
    }

    #[test]
    fn coarsen_is_deterministic() {
        let bytes: Vec<u8> = (0..64u32).map(|i| (i * 4) as u8).collect();
        let a = coarsen(&bytes, 0.16, 8, CoarseGridThresholds::default());
        let b = coarsen(&bytes, 0.16, 8, CoarseGridThresholds::default());
        assert_eq!(a, b);
    }
}
