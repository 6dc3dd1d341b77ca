//! Top-level planner state machine.
//!
//! [`LocalPlanner`] owns the per-tick pipeline: crop the clouds, build
//! the obstacle histogram, evaluate the cost field, and select a flight
//! strategy (climb to altitude, brake, back off, follow the lookahead
//! tree, or steer along the best costmap cell). The boundary feeds it
//! through idempotent setters and triggers one tick at a time.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::core::geometry::{
    cartesian_to_polar, polar_to_cartesian, yaw_to_azimuth_deg, Quaternion, Vec3,
};
use crate::planning::cloud::{filter_point_cloud, BoundingBox, FilteredCloud};
use crate::planning::cost::{
    get_best_candidates, get_cost_matrix, render_histogram_image, CostParams,
    HEADING_SPEED_THRESHOLD,
};
use crate::planning::histogram::{
    calculate_fov, combine_histogram, compress_histogram_elevation, generate_new_histogram,
    propagate_histogram, reproject_points, Fov, Histogram, ALPHA_RES, GRID_LENGTH_Z,
};
use crate::planning::star::{StarPlanner, TreeNode};

/// Close points (inside the backoff distance) needed to trigger a
/// backoff maneuver.
const BACK_OFF_POINT_COUNT: usize = 200;

/// Obstacle ring sensor limits (meters).
const RING_RANGE_MIN: f32 = 0.2;
const RING_RANGE_MAX: f32 = 20.0;
/// Sentinel for ring bins outside the camera FOV.
const RING_OUT_OF_FOV: f32 = u16::MAX as f32;

/// Flight strategy selected for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaypointType {
    /// Hold the current pose
    #[default]
    Hover,
    /// Climb to the start altitude before planning laterally
    ReachHeight,
    /// Fly straight at the (possibly rewritten) goal
    Direct,
    /// Follow the lookahead tree path
    TryPath,
    /// Steer along the single best costmap direction
    Costmap,
    /// Retreat from a too-close obstacle
    GoBack,
}

impl WaypointType {
    /// Stable name for logs and downstream telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaypointType::Hover => "HOVER",
            WaypointType::ReachHeight => "REACH_HEIGHT",
            WaypointType::Direct => "DIRECT",
            WaypointType::TryPath => "TRY_PATH",
            WaypointType::Costmap => "COSTMAP",
            WaypointType::GoBack => "GO_BACK",
        }
    }
}

/// Everything the waypoint generator and the boundary need from one
/// planner tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvoidanceOutput {
    pub waypoint_type: WaypointType,
    pub obstacle_ahead: bool,
    pub velocity_around_obstacles: f32,
    pub velocity_far_from_obstacles: f32,
    pub back_off_point: Vec3,
    pub back_off_start_point: Vec3,
    pub min_dist_backoff: f32,
    pub take_off_pose: Vec3,
    /// Elevation angle of the chosen costmap cell (degrees)
    pub costmap_direction_e: f32,
    /// Azimuth angle of the chosen costmap cell (degrees)
    pub costmap_direction_z: f32,
    /// Lookahead tree path, root position first
    pub path_node_positions: Vec<Vec3>,
    /// When the tree last produced a path
    pub last_path_time: Option<Duration>,
}

/// 1D laser-like obstacle distances shared with the flight controller.
///
/// One bin per histogram azimuth column, index 0 pointing north. In-FOV
/// bins carry the nearest obstacle distance at elevation 0 after
/// compression; empty in-FOV bins are `range_max + 1`, bins outside the
/// FOV are the `u16::MAX` sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleRing {
    pub angle_increment_deg: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
}

impl Default for ObstacleRing {
    fn default() -> Self {
        Self {
            angle_increment_deg: ALPHA_RES as f32,
            range_min: RING_RANGE_MIN,
            range_max: RING_RANGE_MAX,
            ranges: Vec::new(),
        }
    }
}

/// The local avoidance planner.
pub struct LocalPlanner {
    config: PlannerConfig,
    cost_params: CostParams,

    position: Vec3,
    position_old: Vec3,
    yaw: f32,
    pitch: f32,
    velocity: Vec3,
    goal: Vec3,
    take_off_pose: Vec3,
    reach_altitude: bool,
    starting_height: f32,
    armed: bool,
    offboard: bool,
    mission: bool,
    ground_distance: f32,
    last_sent_waypoint: Vec3,
    h_fov_deg: f32,
    v_fov_deg: f32,

    complete_cloud: Vec<Vec<Vec3>>,
    final_cloud: FilteredCloud,
    histogram_box: BoundingBox,
    fov: Fov,

    polar_histogram: Histogram,
    to_fcu_histogram: Histogram,
    hist_is_empty: bool,
    reprojected_points: Vec<Vec3>,
    reprojected_ages: Vec<i32>,

    goal_dist_incline: VecDeque<f32>,
    integral_time_old: Option<Duration>,

    back_off: bool,
    back_off_point: Vec3,
    back_off_start_point: Vec3,
    first_brake: bool,
    stop_in_front_active: bool,

    waypoint_type: WaypointType,
    obstacle_ahead: bool,
    costmap_direction_e: f32,
    costmap_direction_z: f32,
    star_planner: StarPlanner,
    last_path_time: Option<Duration>,

    histogram_image: Vec<u8>,
    cost_image: Vec<u8>,
    distance_ring: ObstacleRing,
}

impl Default for LocalPlanner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl LocalPlanner {
    /// Create a planner with the given configuration.
    pub fn new(config: PlannerConfig) -> Self {
        let mut star_planner = StarPlanner::new();
        star_planner.set_params(&config);

        let cost_params = CostParams {
            goal_cost_param: config.goal_cost_param,
            heading_cost_param: config.heading_cost_param,
            smooth_cost_param: config.smooth_cost_param,
            height_change_cost_param: config.height_change_cost_param,
            height_change_cost_param_adapted: config.height_change_cost_param,
            pitch_cost_param: config.pitch_cost_param,
        };

        Self {
            histogram_box: BoundingBox::new(config.box_radius),
            h_fov_deg: config.h_fov_deg,
            v_fov_deg: config.v_fov_deg,
            cost_params,
            config,
            position: Vec3::ZERO,
            position_old: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            velocity: Vec3::ZERO,
            goal: Vec3::ZERO,
            take_off_pose: Vec3::ZERO,
            reach_altitude: false,
            starting_height: 0.0,
            armed: false,
            offboard: false,
            mission: false,
            ground_distance: 2.0,
            last_sent_waypoint: Vec3::ZERO,
            complete_cloud: Vec::new(),
            final_cloud: FilteredCloud::default(),
            fov: Fov::default(),
            polar_histogram: Histogram::new(ALPHA_RES),
            to_fcu_histogram: Histogram::new(ALPHA_RES),
            hist_is_empty: true,
            reprojected_points: Vec::new(),
            reprojected_ages: Vec::new(),
            goal_dist_incline: VecDeque::new(),
            integral_time_old: None,
            back_off: false,
            back_off_point: Vec3::ZERO,
            back_off_start_point: Vec3::ZERO,
            first_brake: true,
            stop_in_front_active: false,
            waypoint_type: WaypointType::Hover,
            obstacle_ahead: false,
            costmap_direction_e: 0.0,
            costmap_direction_z: 0.0,
            star_planner,
            last_path_time: None,
            histogram_image: Vec::new(),
            cost_image: Vec::new(),
            distance_ring: ObstacleRing::default(),
        }
    }

    // ========================================================================
    // Input setters (applied atomically per tick by the boundary)
    // ========================================================================

    /// Update the vehicle pose. While disarmed the takeoff pose is
    /// re-recorded and the climb phase re-armed.
    pub fn set_pose(&mut self, position: Vec3, orientation: Quaternion) {
        self.position = position;
        self.yaw = orientation.yaw();
        self.pitch = orientation.pitch();
        self.star_planner.set_pose(position, self.yaw);

        if !self.armed && !self.config.disable_rise_to_goal_altitude {
            self.take_off_pose = position;
            self.reach_altitude = false;
        }
    }

    /// Update the vehicle velocity.
    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    /// Update the goal; resets the progress-rate window.
    pub fn set_goal(&mut self, goal: Vec3) {
        self.goal = goal;
        self.star_planner.set_goal(goal);
        self.goal_dist_incline.clear();
        tracing::info!(x = goal.x, y = goal.y, z = goal.z, "goal set");
    }

    /// Update the flight-controller state flags.
    pub fn set_state(&mut self, armed: bool, offboard: bool, mission: bool) {
        self.armed = armed;
        self.offboard = offboard;
        self.mission = mission;
    }

    /// Update the measured ground clearance.
    pub fn set_ground_distance(&mut self, distance: f32) {
        self.ground_distance = distance;
    }

    /// Replace the per-camera clouds for the next tick (already in the
    /// local-origin frame).
    pub fn set_clouds(&mut self, clouds: Vec<Vec<Vec3>>) {
        self.complete_cloud = clouds;
    }

    /// Update the camera field of view in degrees.
    pub fn set_fov(&mut self, h_fov_deg: f32, v_fov_deg: f32) {
        self.h_fov_deg = h_fov_deg;
        self.v_fov_deg = v_fov_deg;
        self.star_planner.set_fov(h_fov_deg, v_fov_deg);
    }

    /// Record the waypoint the boundary last sent to the vehicle, used
    /// by the smoothness cost term.
    pub fn set_last_sent_waypoint(&mut self, waypoint: Vec3) {
        self.last_sent_waypoint = waypoint;
    }

    /// Swap in a new configuration; takes effect on the next tick.
    pub fn set_config(&mut self, config: PlannerConfig) {
        self.cost_params.goal_cost_param = config.goal_cost_param;
        self.cost_params.heading_cost_param = config.heading_cost_param;
        self.cost_params.smooth_cost_param = config.smooth_cost_param;
        self.cost_params.pitch_cost_param = config.pitch_cost_param;
        self.cost_params.height_change_cost_param = config.height_change_cost_param;
        self.cost_params.height_change_cost_param_adapted = self
            .cost_params
            .height_change_cost_param_adapted
            .min(config.height_change_cost_param);
        self.h_fov_deg = config.h_fov_deg;
        self.v_fov_deg = config.v_fov_deg;
        self.star_planner.set_params(&config);
        self.config = config;
    }

    // ========================================================================
    // Planning tick
    // ========================================================================

    /// Run one planning tick. `now` is a monotonic timestamp from the
    /// caller; it drives the progress-rate window and path timing.
    pub fn run_planner(&mut self, now: Duration) {
        self.stop_in_front_active = false;

        tracing::debug!(
            cameras = self.complete_cloud.len(),
            "planning tick started"
        );

        self.fov = calculate_fov(self.h_fov_deg, self.v_fov_deg, self.yaw, self.pitch);

        self.histogram_box = BoundingBox::new(self.config.box_radius);
        self.histogram_box
            .set_limits(&self.position, self.ground_distance);

        self.final_cloud = filter_point_cloud(
            &self.complete_cloud,
            &self.histogram_box,
            &self.position,
            self.config.min_realsense_dist,
            self.config.min_dist_backoff,
        );

        self.determine_strategy(now);
    }

    fn determine_strategy(&mut self, now: Duration) {
        self.star_planner.age_tree();
        self.cost_image.clear();

        if self.config.disable_rise_to_goal_altitude {
            self.reach_altitude = true;
        }

        if !self.reach_altitude {
            self.starting_height = (self.goal.z - 0.5).max(self.take_off_pose.z + 1.0);
            tracing::info!(
                starting_height = self.starting_height,
                "climbing to start height before planning"
            );
            self.waypoint_type = WaypointType::ReachHeight;

            if self.position.z > self.starting_height {
                self.reach_altitude = true;
                self.waypoint_type = WaypointType::Direct;
            }

            if self.config.send_obstacles_fcu {
                self.create_2d_obstacle_representation(true);
            }
        } else if self.final_cloud.is_obstacle(self.config.min_cloud_size)
            && self.config.stop_in_front
        {
            self.obstacle_ahead = true;
            tracing::info!("obstacle ahead, braking in front of it");
            self.stop_in_front_obstacles();
            self.waypoint_type = WaypointType::Direct;

            if self.config.send_obstacles_fcu {
                self.create_2d_obstacle_representation(true);
            }
        } else if ((self.final_cloud.n_close > BACK_OFF_POINT_COUNT
            && self.final_cloud.is_obstacle(self.config.min_cloud_size))
            || self.back_off)
            && self.config.use_back_off
        {
            if !self.back_off {
                self.back_off_point = self.final_cloud.closest_point.unwrap_or(self.position);
                self.back_off_start_point = self.position;
                self.back_off = true;
                tracing::warn!("obstacle inside backoff distance, retreating");
            } else {
                let dist = self.position.distance(&self.back_off_point);
                if dist > self.config.min_dist_backoff + 1.0 {
                    self.back_off = false;
                }
            }
            self.waypoint_type = WaypointType::GoBack;

            if self.config.send_obstacles_fcu {
                self.create_2d_obstacle_representation(true);
            }
        } else {
            self.evaluate_progress_rate(now);
            self.create_2d_obstacle_representation(self.config.send_obstacles_fcu);

            if self.hist_is_empty {
                self.obstacle_ahead = false;
                self.waypoint_type = WaypointType::TryPath;
            } else {
                self.obstacle_ahead = true;

                let moving = self.velocity.norm() >= HEADING_SPEED_THRESHOLD;
                let (cost_matrix, cost_image) = get_cost_matrix(
                    &self.polar_histogram,
                    &self.goal,
                    &self.position,
                    yaw_to_azimuth_deg(self.yaw),
                    &self.last_sent_waypoint,
                    &self.cost_params,
                    moving,
                    self.config.smoothing_margin_degrees,
                );
                self.cost_image = cost_image;

                if self.config.use_vfh_star {
                    self.star_planner.set_params(&self.config);
                    self.star_planner.set_cost_params(self.cost_params);
                    self.star_planner.set_fov(self.h_fov_deg, self.v_fov_deg);
                    self.star_planner.set_cloud(self.final_cloud.clone());
                    self.star_planner.set_reprojected_points(
                        self.reprojected_points.clone(),
                        self.reprojected_ages.clone(),
                    );

                    // last chosen direction, projected out to goal
                    // distance for the smoothness term
                    let mut last_pol =
                        cartesian_to_polar(&self.last_sent_waypoint, &self.position);
                    last_pol.r = self.position.distance(&self.goal);
                    self.star_planner
                        .set_last_direction(polar_to_cartesian(&last_pol, &self.position));

                    self.star_planner.build_look_ahead_tree();
                    self.waypoint_type = WaypointType::TryPath;
                    self.last_path_time = Some(now);
                } else {
                    let candidates = get_best_candidates(&cost_matrix, 1);
                    match candidates.first() {
                        Some(best) => {
                            self.costmap_direction_e = best.elevation_angle;
                            self.costmap_direction_z = best.azimuth_angle;
                            self.waypoint_type = WaypointType::Costmap;
                        }
                        None => {
                            self.stop_in_front_obstacles();
                            self.waypoint_type = WaypointType::Direct;
                            self.config.stop_in_front = true;
                            tracing::info!(
                                "all directions blocked, stopping in front of obstacle"
                            );
                        }
                    }
                }
            }

            self.first_brake = true;
        }

        self.position_old = self.position;
    }

    /// Build the combined 2D obstacle representation for this tick and
    /// optionally refresh the flight-controller distance ring.
    fn create_2d_obstacle_representation(&mut self, send_to_fcu: bool) {
        let (points, ages) = reproject_points(
            &self.polar_histogram,
            &self.position_old,
            &self.position,
            self.config.box_radius,
            self.config.reproj_age,
        );
        self.reprojected_points = points;
        self.reprojected_ages = ages;

        let mut propagated = Histogram::new(2 * ALPHA_RES);
        propagate_histogram(
            &mut propagated,
            &self.reprojected_points,
            &self.reprojected_ages,
            &self.position,
        );

        let mut new_histogram = Histogram::new(ALPHA_RES);
        generate_new_histogram(&mut new_histogram, &self.final_cloud, &self.position);
        self.hist_is_empty = combine_histogram(&mut new_histogram, &propagated, &self.fov);

        if send_to_fcu {
            self.to_fcu_histogram.set_zero();
            compress_histogram_elevation(&mut self.to_fcu_histogram, &new_histogram);
            self.update_obstacle_distance_ring();
        }

        self.polar_histogram = new_histogram;
        self.histogram_image =
            render_histogram_image(&self.polar_histogram, self.config.box_radius);
    }

    /// Track the goal-distance derivative over a sliding window and
    /// adapt the climb penalty: when progress stalls, lower it so the
    /// planner prefers flying over obstacles instead of around them.
    fn evaluate_progress_rate(&mut self, now: Duration) {
        if self.reach_altitude && self.config.adapt_cost_params {
            let goal_dist = self.position.distance(&self.goal);
            let goal_dist_old = self.position_old.distance(&self.goal);

            if let Some(prev) = self.integral_time_old {
                let dt = now.saturating_sub(prev).as_secs_f32();
                if dt > 0.0 {
                    let incline = (goal_dist - goal_dist_old) / dt;
                    self.goal_dist_incline.push_back(incline);
                    if self.goal_dist_incline.len() > self.config.dist_incline_window_size {
                        self.goal_dist_incline.pop_front();
                    }
                }
            }
            self.integral_time_old = Some(now);

            if self.goal_dist_incline.is_empty() {
                return;
            }
            let avg_incline = self.goal_dist_incline.iter().sum::<f32>()
                / self.goal_dist_incline.len() as f32;

            let params = &mut self.cost_params;
            if avg_incline > self.config.no_progress_slope
                && self.goal_dist_incline.len() == self.config.dist_incline_window_size
                && params.height_change_cost_param_adapted > 0.75
            {
                params.height_change_cost_param_adapted =
                    (params.height_change_cost_param_adapted - 0.02).max(0.75);
            }
            if avg_incline < self.config.no_progress_slope
                && params.height_change_cost_param_adapted
                    < params.height_change_cost_param - 0.03
            {
                params.height_change_cost_param_adapted += 0.03;
            }

            tracing::debug!(
                progress_rate = avg_incline,
                adapted_height_cost = params.height_change_cost_param_adapted,
                "progress rate updated"
            );
        } else {
            self.cost_params.height_change_cost_param_adapted =
                self.cost_params.height_change_cost_param;
        }
    }

    /// Rewrite the goal onto the goal ray at braking distance from the
    /// closest obstacle. Latched per approach through `first_brake`.
    fn stop_in_front_obstacles(&mut self) {
        if self.first_brake {
            let braking_distance = if self.final_cloud.distance_to_closest < f32::MAX {
                (self.final_cloud.distance_to_closest - self.config.keep_distance).abs()
            } else {
                0.0
            };

            let to_goal = Vec3::new(
                self.goal.x - self.position.x,
                self.goal.y - self.position.y,
                0.0,
            )
            .normalized();
            self.goal.x = self.position.x + braking_distance * to_goal.x;
            self.goal.y = self.position.y + braking_distance * to_goal.y;

            self.first_brake = false;
            self.stop_in_front_active = true;
        }
        tracing::info!(
            x = self.goal.x,
            y = self.goal.y,
            z = self.goal.z,
            obstacle_distance = self.final_cloud.distance_to_closest,
            "braking goal set"
        );
    }

    /// Rebuild the obstacle distance ring from the elevation-compressed
    /// histogram. Ring indices point north; histogram azimuths point
    /// south of the same column, hence the half-turn shift.
    fn update_obstacle_distance_ring(&mut self) {
        let half = GRID_LENGTH_Z / 2;
        let north_fov: Vec<usize> = self
            .fov
            .z_idx
            .iter()
            .map(|&i| (i + half) % GRID_LENGTH_Z)
            .collect();

        let mut ranges = Vec::with_capacity(GRID_LENGTH_Z);
        for idx in 0..GRID_LENGTH_Z {
            let range = if !north_fov.contains(&idx) {
                RING_OUT_OF_FOV
            } else {
                let hist_idx = (idx + GRID_LENGTH_Z - half) % GRID_LENGTH_Z;
                let dist = self.to_fcu_histogram.get_dist(0, hist_idx);
                if dist == 0.0 {
                    RING_RANGE_MAX + 1.0
                } else {
                    dist
                }
            };
            ranges.push(range);
        }

        self.distance_ring = ObstacleRing {
            ranges,
            ..Default::default()
        };
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// The tick's result for the waypoint generator and the boundary.
    pub fn avoidance_output(&self) -> AvoidanceOutput {
        AvoidanceOutput {
            waypoint_type: self.waypoint_type,
            obstacle_ahead: self.obstacle_ahead,
            velocity_around_obstacles: self.config.velocity_around_obstacles,
            velocity_far_from_obstacles: self.config.velocity_far_from_obstacles,
            back_off_point: self.back_off_point,
            back_off_start_point: self.back_off_start_point,
            min_dist_backoff: self.config.min_dist_backoff,
            take_off_pose: self.take_off_pose,
            costmap_direction_e: self.costmap_direction_e,
            costmap_direction_z: self.costmap_direction_z,
            path_node_positions: self.star_planner.path_node_positions.clone(),
            last_path_time: self.last_path_time,
        }
    }

    /// Lookahead tree, closed set and path for visualization.
    pub fn tree(&self) -> (&[TreeNode], &[usize], &[Vec3]) {
        (
            &self.star_planner.tree,
            &self.star_planner.closed_set,
            &self.star_planner.path_node_positions,
        )
    }

    /// Combined polar histogram of the last tick.
    pub fn histogram(&self) -> &Histogram {
        &self.polar_histogram
    }

    /// Grayscale depth image of the histogram.
    pub fn histogram_image(&self) -> &[u8] {
        &self.histogram_image
    }

    /// RGB image of the last cost matrix (empty when no matrix was
    /// evaluated this tick).
    pub fn cost_image(&self) -> &[u8] {
        &self.cost_image
    }

    /// Cropped cloud and reprojected points for visualization.
    pub fn clouds_for_visualization(&self) -> (&FilteredCloud, &[Vec3]) {
        (&self.final_cloud, &self.reprojected_points)
    }

    /// Distance to the closest cropped point (`f32::MAX` when clear).
    pub fn closest_distance(&self) -> f32 {
        self.final_cloud.distance_to_closest
    }

    /// Closest cropped point, if any.
    pub fn closest_point(&self) -> Option<Vec3> {
        self.final_cloud.closest_point
    }

    /// Obstacle distance ring for the flight controller.
    pub fn obstacle_distance_ring(&self) -> &ObstacleRing {
        &self.distance_ring
    }

    /// Current goal (rewritten while braking in front of an obstacle).
    pub fn goal(&self) -> Vec3 {
        self.goal
    }

    /// Current vehicle position.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Current FCU-frame yaw in radians.
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Current vehicle velocity.
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// The braking rewrite fired this tick; the boundary should adopt
    /// the new goal.
    pub fn stop_in_front_active(&self) -> bool {
        self.stop_in_front_active
    }

    /// Crop box of the last tick.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.histogram_box
    }

    /// Height the climb phase is aiming for.
    pub fn starting_height(&self) -> f32 {
        self.starting_height
    }

    /// Vehicle is armed and in a mode where the planner output is
    /// consumed.
    pub fn is_airborne(&self) -> bool {
        self.armed && (self.offboard || self.mission)
    }

    /// Active configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn cost_params(&self) -> &CostParams {
        &self.cost_params
    }
}
