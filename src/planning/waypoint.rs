//! Waypoint post-processing.
//!
//! Turns the strategy selector's chosen direction into the actual
//! position/velocity setpoint: projects the direction to unit length,
//! scales it by an obstacle-distance dependent speed, runs a critically
//! damped smoother over the result, and aligns yaw with the direction of
//! motion. Hover and pre-takeoff hold the current pose.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::core::geometry::{
    azimuth_to_yaw, next_yaw, polar_to_cartesian, PolarPoint, Quaternion, Vec3,
};
use crate::core::math::{angular_velocity, logistic};
use crate::planning::planner::{AvoidanceOutput, WaypointType};

/// Below this horizontal travel the yaw setpoint holds the current yaw
/// instead of chasing setpoint noise.
const YAW_ALIGN_MIN_TRAVEL: f32 = 0.1;

/// Step length of a single backoff move (meters).
const BACK_OFF_STEP: f32 = 0.5;

/// Vehicle state consumed by the waypoint generator each tick.
#[derive(Debug, Clone, Copy)]
pub struct WaypointInput {
    pub position: Vec3,
    /// FCU-frame yaw in radians
    pub yaw: f32,
    pub velocity: Vec3,
    pub goal: Vec3,
    /// Distance to the closest cropped-cloud point, `f32::MAX` when the
    /// scene is clear
    pub distance_to_closest: f32,
    /// Hold position regardless of the planner output
    pub hover: bool,
    /// Vehicle is flying; smoothing is bypassed on the ground
    pub is_airborne: bool,
}

/// One tick's setpoint bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointResult {
    pub waypoint_type: WaypointType,
    /// Raw direction projected one meter out
    pub goto_position: Vec3,
    /// Direction scaled to the commanded speed
    pub adapted_goto_position: Vec3,
    /// Smoothed position setpoint (primary unless velocity is)
    pub smoothed_goto_position: Vec3,
    /// Final position setpoint
    pub position_wp: Vec3,
    /// Orientation setpoint, yaw aligned with motion
    pub orientation_wp: Quaternion,
    /// Velocity setpoint
    pub linear_velocity_wp: Vec3,
    /// Yaw rate setpoint in rad/s
    pub angular_velocity_wp: f32,
    /// Velocity setpoint is the primary output
    pub velocity_primary: bool,
}

/// Stateful setpoint generator; one instance lives alongside the planner
/// and is advanced once per tick.
pub struct WaypointGenerator {
    smoothing_speed_xy: f32,
    smoothing_speed_z: f32,
    use_vel_setpoints: bool,
    velocity_sigmoid_slope: f32,
    keep_distance: f32,

    smoothed_position: Option<Vec3>,
    smoothed_velocity: Vec3,
    last_update: Option<Duration>,
    hover_position: Option<Vec3>,
}

impl Default for WaypointGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl WaypointGenerator {
    /// Create a generator with default smoothing parameters.
    pub fn new() -> Self {
        let config = PlannerConfig::default();
        let mut generator = Self {
            smoothing_speed_xy: 0.0,
            smoothing_speed_z: 0.0,
            use_vel_setpoints: false,
            velocity_sigmoid_slope: 1.0,
            keep_distance: 0.0,
            smoothed_position: None,
            smoothed_velocity: Vec3::ZERO,
            last_update: None,
            hover_position: None,
        };
        generator.set_config(&config);
        generator
    }

    /// Pull the generator's parameters out of the planner configuration.
    pub fn set_config(&mut self, config: &PlannerConfig) {
        self.smoothing_speed_xy = config.smoothing_speed_xy;
        self.smoothing_speed_z = config.smoothing_speed_z;
        self.use_vel_setpoints = config.use_vel_setpoints;
        self.velocity_sigmoid_slope = config.velocity_sigmoid_slope;
        self.keep_distance = config.keep_distance;
    }

    /// Produce the setpoint for one tick.
    ///
    /// `now` is a monotonic timestamp supplied by the caller; it only
    /// drives the smoother integration step.
    pub fn update(
        &mut self,
        planner: &AvoidanceOutput,
        input: &WaypointInput,
        now: Duration,
    ) -> WaypointResult {
        let dt = self.step_dt(now);

        if input.hover || !input.is_airborne {
            return self.hold_position(input);
        }
        self.hover_position = None;

        let goto_position = self.select_goto_position(planner, input);
        let direction = (goto_position - input.position).normalized();
        let speed = self.adapt_speed(planner, input);

        let adapted_goto_position = if planner.waypoint_type == WaypointType::GoBack {
            goto_position
        } else {
            input.position + direction * speed
        };

        let smoothed_goto_position = self.smooth(adapted_goto_position, input.position, dt);
        let position_wp = smoothed_goto_position;

        // yaw follows motion unless the setpoint stays on the spot; a
        // backoff retreats without turning away from the obstacle
        let travel_xy = (position_wp - input.position).norm_xy();
        let desired_yaw = if planner.waypoint_type != WaypointType::GoBack
            && travel_xy > YAW_ALIGN_MIN_TRAVEL
        {
            azimuth_to_yaw(next_yaw(&input.position, &position_wp))
        } else {
            input.yaw
        };

        WaypointResult {
            waypoint_type: planner.waypoint_type,
            goto_position,
            adapted_goto_position,
            smoothed_goto_position,
            position_wp,
            orientation_wp: Quaternion::from_yaw(desired_yaw),
            linear_velocity_wp: direction * speed,
            angular_velocity_wp: angular_velocity(desired_yaw, input.yaw),
            velocity_primary: self.use_vel_setpoints,
        }
    }

    /// Raw goto position one step from the vehicle for the selected
    /// strategy.
    fn select_goto_position(&self, planner: &AvoidanceOutput, input: &WaypointInput) -> Vec3 {
        match planner.waypoint_type {
            WaypointType::ReachHeight => {
                let starting_height =
                    (input.goal.z - 0.5).max(planner.take_off_pose.z + 1.0);
                Vec3::new(
                    planner.take_off_pose.x,
                    planner.take_off_pose.y,
                    starting_height,
                )
            }
            WaypointType::GoBack => {
                let mut away = input.position - planner.back_off_point;
                away.z = 0.0;
                let mut p = input.position + away.normalized() * BACK_OFF_STEP;
                p.z = planner.back_off_start_point.z;
                p
            }
            WaypointType::Costmap => {
                let direction = PolarPoint::new(
                    planner.costmap_direction_e,
                    planner.costmap_direction_z,
                    1.0,
                );
                polar_to_cartesian(&direction, &input.position)
            }
            WaypointType::TryPath => {
                if planner.path_node_positions.len() >= 2 {
                    let next = planner.path_node_positions[1];
                    input.position + (next - input.position).normalized()
                } else {
                    input.position + (input.goal - input.position).normalized()
                }
            }
            WaypointType::Direct | WaypointType::Hover => {
                input.position + (input.goal - input.position).normalized()
            }
        }
    }

    /// Commanded speed from the obstacle distance: a logistic blend
    /// between the near-obstacle and free-space limits centered on the
    /// braking distance.
    fn adapt_speed(&self, planner: &AvoidanceOutput, input: &WaypointInput) -> f32 {
        match planner.waypoint_type {
            WaypointType::GoBack => planner.velocity_around_obstacles,
            _ if planner.obstacle_ahead && input.distance_to_closest < f32::MAX => {
                planner.velocity_around_obstacles
                    + (planner.velocity_far_from_obstacles - planner.velocity_around_obstacles)
                        * logistic(
                            self.velocity_sigmoid_slope
                                * (input.distance_to_closest - self.keep_distance),
                        )
            }
            _ => planner.velocity_far_from_obstacles,
        }
    }

    /// Critically damped second-order filter toward `target`, per axis.
    /// Seeds at the vehicle position on first use; bypassed when the
    /// smoothing speed is disabled.
    fn smooth(&mut self, target: Vec3, seed: Vec3, dt: f32) -> Vec3 {
        if self.smoothing_speed_xy <= 0.0 && self.smoothing_speed_z <= 0.0 {
            return target;
        }

        let mut position = match self.smoothed_position {
            Some(p) => p,
            None => {
                self.smoothed_velocity = Vec3::ZERO;
                seed
            }
        };
        let mut velocity = self.smoothed_velocity;

        let step = |x: &mut f32, v: &mut f32, target: f32, omega: f32| {
            if omega <= 0.0 {
                *x = target;
                *v = 0.0;
                return;
            }
            let accel = omega * omega * (target - *x) - 2.0 * omega * *v;
            *v += accel * dt;
            *x += *v * dt;
        };

        step(
            &mut position.x,
            &mut velocity.x,
            target.x,
            self.smoothing_speed_xy,
        );
        step(
            &mut position.y,
            &mut velocity.y,
            target.y,
            self.smoothing_speed_xy,
        );
        step(
            &mut position.z,
            &mut velocity.z,
            target.z,
            self.smoothing_speed_z,
        );

        self.smoothed_position = Some(position);
        self.smoothed_velocity = velocity;
        position
    }

    /// Hold the current pose: used for hover requests and on the ground.
    fn hold_position(&mut self, input: &WaypointInput) -> WaypointResult {
        let hold = *self.hover_position.get_or_insert(input.position);
        self.smoothed_position = Some(hold);
        self.smoothed_velocity = Vec3::ZERO;

        WaypointResult {
            waypoint_type: WaypointType::Hover,
            goto_position: hold,
            adapted_goto_position: hold,
            smoothed_goto_position: hold,
            position_wp: hold,
            orientation_wp: Quaternion::from_yaw(input.yaw),
            linear_velocity_wp: Vec3::ZERO,
            angular_velocity_wp: 0.0,
            velocity_primary: self.use_vel_setpoints,
        }
    }

    /// Integration step from the previous update, clamped so a late tick
    /// cannot make the smoother overshoot.
    fn step_dt(&mut self, now: Duration) -> f32 {
        let dt = match self.last_update {
            Some(prev) if now > prev => (now - prev).as_secs_f32().clamp(0.01, 0.2),
            _ => 0.05,
        };
        self.last_update = Some(now);
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn base_output(waypoint_type: WaypointType) -> AvoidanceOutput {
        AvoidanceOutput {
            waypoint_type,
            obstacle_ahead: false,
            velocity_around_obstacles: 1.0,
            velocity_far_from_obstacles: 3.0,
            back_off_point: Vec3::ZERO,
            back_off_start_point: Vec3::ZERO,
            min_dist_backoff: 1.0,
            take_off_pose: Vec3::ZERO,
            costmap_direction_e: 0.0,
            costmap_direction_z: 0.0,
            path_node_positions: Vec::new(),
            last_path_time: None,
        }
    }

    fn airborne_input(position: Vec3, goal: Vec3) -> WaypointInput {
        WaypointInput {
            position,
            yaw: 0.0,
            velocity: Vec3::ZERO,
            goal,
            distance_to_closest: f32::MAX,
            hover: false,
            is_airborne: true,
        }
    }

    #[test]
    fn test_direct_advances_toward_goal() {
        let mut generator = WaypointGenerator::new();
        let planner = base_output(WaypointType::Direct);
        let input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));

        let wp = generator.update(&planner, &input, Duration::from_millis(0));

        assert_relative_eq!(wp.goto_position.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(wp.goto_position.z, 5.0, epsilon = 1e-5);
        // free space: full speed
        assert_relative_eq!(wp.linear_velocity_wp.norm(), 3.0, epsilon = 1e-4);
        assert!(!wp.velocity_primary);
    }

    #[test]
    fn test_speed_drops_near_obstacles() {
        let mut generator = WaypointGenerator::new();
        let config = PlannerConfig {
            keep_distance: 2.0,
            ..Default::default()
        };
        generator.set_config(&config);

        let mut planner = base_output(WaypointType::Direct);
        planner.obstacle_ahead = true;

        let mut input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));

        input.distance_to_closest = 2.0; // at braking distance: midpoint
        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        assert_relative_eq!(wp.linear_velocity_wp.norm(), 2.0, epsilon = 1e-3);

        input.distance_to_closest = 0.5; // very close: near the low limit
        let wp = generator.update(&planner, &input, Duration::from_millis(100));
        assert!(wp.linear_velocity_wp.norm() < 2.0);

        input.distance_to_closest = 11.0; // far: near the high limit
        let wp = generator.update(&planner, &input, Duration::from_millis(200));
        assert!(wp.linear_velocity_wp.norm() > 2.9);
    }

    #[test]
    fn test_hover_holds_pose() {
        let mut generator = WaypointGenerator::new();
        let planner = base_output(WaypointType::TryPath);
        let mut input = airborne_input(Vec3::new(1.0, 2.0, 5.0), Vec3::new(10.0, 0.0, 5.0));
        input.hover = true;

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        assert_eq!(wp.waypoint_type, WaypointType::Hover);
        assert_eq!(wp.position_wp, input.position);
        assert_eq!(wp.linear_velocity_wp, Vec3::ZERO);

        // the held position does not drift with the vehicle
        input.position = Vec3::new(1.1, 2.0, 5.0);
        let wp = generator.update(&planner, &input, Duration::from_millis(100));
        assert_eq!(wp.position_wp, Vec3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn test_on_ground_bypasses_smoothing() {
        let mut generator = WaypointGenerator::new();
        let planner = base_output(WaypointType::Direct);
        let mut input = airborne_input(Vec3::new(0.0, 0.0, 0.1), Vec3::new(0.0, 0.0, 5.0));
        input.is_airborne = false;

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        assert_eq!(wp.position_wp, input.position);
    }

    #[test]
    fn test_reach_height_targets_takeoff_column() {
        let mut generator = WaypointGenerator::new();
        let mut planner = base_output(WaypointType::ReachHeight);
        planner.take_off_pose = Vec3::new(0.0, 0.0, 0.2);
        let input = airborne_input(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 5.0));

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        // starting height = max(5 - 0.5, 0.2 + 1.0) = 4.5
        assert_relative_eq!(wp.goto_position.z, 4.5, epsilon = 1e-5);
        assert_relative_eq!(wp.goto_position.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_go_back_retreats_from_obstacle() {
        let mut generator = WaypointGenerator::new();
        let mut planner = base_output(WaypointType::GoBack);
        planner.back_off_point = Vec3::new(2.0, 0.0, 5.0);
        planner.back_off_start_point = Vec3::new(0.0, 0.0, 5.0);
        let input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        // retreat along -x, altitude pinned to the backoff start
        assert!(wp.goto_position.x < 0.0);
        assert_relative_eq!(wp.goto_position.z, 5.0, epsilon = 1e-5);
        assert_relative_eq!(wp.linear_velocity_wp.norm(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_costmap_direction_followed() {
        let mut generator = WaypointGenerator::new();
        let mut planner = base_output(WaypointType::Costmap);
        planner.costmap_direction_e = 0.0;
        planner.costmap_direction_z = 90.0; // due east
        let input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        assert_relative_eq!(wp.goto_position.x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(wp.goto_position.y, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_try_path_follows_tree() {
        let mut generator = WaypointGenerator::new();
        let mut planner = base_output(WaypointType::TryPath);
        planner.path_node_positions = vec![
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::new(0.0, 1.0, 5.0),
            Vec3::new(0.0, 2.0, 5.0),
        ];
        let input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        // the first tree edge points north, not at the goal
        assert_relative_eq!(wp.goto_position.y, 1.0, epsilon = 1e-4);
        assert!(wp.goto_position.x.abs() < 1e-4);
    }

    #[test]
    fn test_smoother_converges_to_target() {
        let mut generator = WaypointGenerator::new();
        let planner = base_output(WaypointType::Direct);
        let input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 0.0, 5.0));

        let mut wp = generator.update(&planner, &input, Duration::from_millis(0));
        // the filter seeds at the vehicle, not at the target
        let first_travel = wp.position_wp.distance(&input.position);
        assert!(first_travel < 1.0);

        for i in 1..100 {
            wp = generator.update(&planner, &input, Duration::from_millis(i * 50));
        }
        // the smoothed setpoint settles at the adapted target
        assert!(wp.position_wp.distance(&wp.adapted_goto_position) < 0.05);
        assert_relative_eq!(wp.position_wp.x, 3.0, epsilon = 0.05);
    }

    #[test]
    fn test_yaw_aligns_with_motion() {
        let mut generator = WaypointGenerator::new();
        let planner = base_output(WaypointType::Direct);
        // goal due north: desired FCU yaw is pi/2
        let input = airborne_input(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 10.0, 5.0));

        let wp = generator.update(&planner, &input, Duration::from_millis(0));
        assert_relative_eq!(
            wp.orientation_wp.yaw(),
            std::f32::consts::FRAC_PI_2,
            epsilon = 1e-4
        );
        // turning left: positive yaw rate
        assert!(wp.angular_velocity_wp > 0.0);
    }
}
