//! Configuration for the local planner.
//!
//! The host hands a [`PlannerConfig`] to the planner between ticks;
//! changes take effect on the next tick. The struct can also be loaded
//! from a TOML file, with every field optional.

use crate::error::{PlannerError, Result};
use serde::Deserialize;
use std::path::Path;

/// All recognized planner options.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Half side of the cloud cropping cube (meters)
    pub box_radius: f32,

    /// Weight of the goal-direction cost term
    pub goal_cost_param: f32,

    /// Weight of the heading-change cost term
    pub heading_cost_param: f32,

    /// Weight of the smoothness cost term
    pub smooth_cost_param: f32,

    /// Nominal weight of the climb penalty
    pub height_change_cost_param: f32,

    /// Per-degree climb penalty factor
    pub pitch_cost_param: f32,

    /// Speed limit near obstacles (m/s)
    pub velocity_around_obstacles: f32,

    /// Speed limit in free space (m/s)
    pub velocity_far_from_obstacles: f32,

    /// Braking distance kept to the closest obstacle (meters)
    pub keep_distance: f32,

    /// Backoff trigger/exit distance (meters)
    pub min_dist_backoff: f32,

    /// Maximum cell age eligible for reprojection (ticks)
    pub reproj_age: i32,

    /// Slope of the obstacle-distance to speed mapping
    pub velocity_sigmoid_slope: f32,

    /// Goal-distance derivative above which progress counts as stalled
    pub no_progress_slope: f32,

    /// Minimum points in the cropped cloud to count as an obstacle
    pub min_cloud_size: usize,

    /// Sensor minimum range; closer points are dropped (meters)
    pub min_realsense_dist: f32,

    /// Seconds without cloud data before requesting hover
    pub timeout_critical: f32,

    /// Seconds without cloud data before requesting flight termination
    pub timeout_termination: f32,

    /// Children spawned per expanded tree node
    pub children_per_node: usize,

    /// Tree expansion budget per tick
    pub n_expanded_nodes: usize,

    /// Edge length of tree expansions (meters)
    pub tree_node_distance: f32,

    /// Angular margin added around occupied cells (degrees)
    pub smoothing_margin_degrees: f32,

    /// Natural frequency of the horizontal waypoint smoother (rad/s)
    pub smoothing_speed_xy: f32,

    /// Natural frequency of the vertical waypoint smoother (rad/s)
    pub smoothing_speed_z: f32,

    /// Horizontal camera field of view (degrees)
    pub h_fov_deg: f32,

    /// Vertical camera field of view (degrees)
    pub v_fov_deg: f32,

    /// Length of the goal-progress sliding window (ticks)
    pub dist_incline_window_size: usize,

    /// Publish velocity setpoints as primary output
    pub use_vel_setpoints: bool,

    /// Brake in front of obstacles instead of avoiding
    pub stop_in_front: bool,

    /// Retreat from obstacles that appear inside the backoff distance
    pub use_back_off: bool,

    /// Use the lookahead tree instead of the single best costmap cell
    pub use_vfh_star: bool,

    /// Adapt the climb penalty to the observed progress rate
    pub adapt_cost_params: bool,

    /// Keep the obstacle distance ring updated for the flight controller
    pub send_obstacles_fcu: bool,

    /// Skip the initial climb to goal altitude
    pub disable_rise_to_goal_altitude: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            box_radius: 12.0,
            goal_cost_param: 2.0,
            heading_cost_param: 0.5,
            smooth_cost_param: 1.5,
            height_change_cost_param: 1.0,
            pitch_cost_param: 0.3,
            velocity_around_obstacles: 1.0,
            velocity_far_from_obstacles: 3.0,
            keep_distance: 6.0,
            min_dist_backoff: 1.0,
            reproj_age: 30,
            velocity_sigmoid_slope: 1.0,
            no_progress_slope: -0.0007,
            min_cloud_size: 160,
            min_realsense_dist: 0.2,
            timeout_critical: 0.5,
            timeout_termination: 15.0,
            children_per_node: 5,
            n_expanded_nodes: 30,
            tree_node_distance: 1.0,
            smoothing_margin_degrees: 30.0,
            smoothing_speed_xy: 10.0,
            smoothing_speed_z: 3.0,
            h_fov_deg: 59.0,
            v_fov_deg: 46.0,
            dist_incline_window_size: 10,
            use_vel_setpoints: false,
            stop_in_front: false,
            use_back_off: true,
            use_vfh_star: true,
            adapt_cost_params: true,
            send_obstacles_fcu: false,
            disable_rise_to_goal_altitude: false,
        }
    }
}

impl PlannerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlannerError::Config(format!("Failed to read config file: {}", e)))?;
        let config: PlannerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
