//! The planning pipeline: cloud cropping, polar histogram, cost field,
//! lookahead tree, strategy selection, and waypoint generation.

pub mod cloud;
pub mod cost;
pub mod histogram;
pub mod planner;
pub mod star;
pub mod waypoint;

pub use cloud::{filter_point_cloud, BoundingBox, FilteredCloud};
pub use cost::{get_best_candidates, get_cost_matrix, CandidateDirection, CostMatrix, CostParams};
pub use histogram::{calculate_fov, Fov, Histogram, ALPHA_RES, GRID_LENGTH_E, GRID_LENGTH_Z};
pub use planner::{AvoidanceOutput, LocalPlanner, ObstacleRing, WaypointType};
pub use star::{StarPlanner, TreeNode};
pub use waypoint::{WaypointGenerator, WaypointInput, WaypointResult};
