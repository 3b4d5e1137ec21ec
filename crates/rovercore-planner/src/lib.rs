//! `rovercore-planner` – the hierarchical grid abstraction used for
//! planning: [`coarse_grid`] downsamples a raw occupancy raster into a
//! three-valued [`rovercore_types::PlanningGrid`], and [`dstar`] searches
//! that grid for a path from the robot's current cell to a goal cell.

pub mod coarse_grid;
pub mod dstar;

pub use coarse_grid::{cell_px, coarsen, CoarseGridThresholds};
pub use dstar::Planner;
