//! # akash-nav
//!
//! Reactive local obstacle avoidance for aerial vehicles.
//!
//! ## Overview
//!
//! Given the vehicle pose, velocity, a goal, and depth point clouds,
//! the planner computes a collision-free waypoint and velocity setpoint
//! each tick:
//!
//! - **Cloud filter** crops the merged clouds to a cube around the
//!   vehicle and extracts the closest obstacle
//! - **Histogram** bins obstacles into a polar grid and carries stale
//!   observations outside the camera FOV forward by reprojection
//! - **Cost field** scores every direction against goal alignment,
//!   heading continuity, smoothness, climb penalty, and obstacles
//! - **VFH\* tree** looks several steps ahead over candidate directions
//! - **Strategy selector** switches between climbing to altitude,
//!   braking, backing off, tree following, and costmap steering
//! - **Waypoint generator** turns the chosen direction into a smoothed
//!   position/velocity setpoint
//!
//! The transport layer, frame transforms, and visualization rendering
//! are host concerns; inputs arrive through [`PlannerHandle`] setters
//! and a tick is triggered with [`PlannerHandle::notify_tick`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use akash_nav::{spawn_planner_thread, PlannerConfig, PlannerHandle, Quaternion, Vec3};
//!
//! let handle = PlannerHandle::new(PlannerConfig::default());
//! let worker = spawn_planner_thread(handle.shared());
//!
//! handle.set_pose(Vec3::new(0.0, 0.0, 5.0), Quaternion::identity());
//! handle.set_goal(Vec3::new(10.0, 0.0, 5.0));
//! handle.set_clouds(vec![vec![]]);
//! handle.notify_tick();
//!
//! // ... read handle.last_waypoint() after the tick completes
//! handle.shutdown();
//! worker.join().unwrap();
//! ```
//!
//! ## Coordinate system
//!
//! Local-origin ENU frame: x east, y north, z up. FCU yaw is measured
//! from +x; histogram azimuth is measured from +y (0° = north) in
//! (-180°, 180°], elevation from the horizontal in (-90°, 90°].

pub mod config;
pub mod core;
pub mod error;
pub mod planning;
pub mod shared;
pub mod threads;

pub use config::PlannerConfig;
pub use core::{PolarPoint, Quaternion, Vec3};
pub use error::{PlannerError, Result};
pub use planning::{
    AvoidanceOutput, LocalPlanner, ObstacleRing, WaypointGenerator, WaypointInput,
    WaypointResult, WaypointType,
};
pub use shared::PlannerHandle;
pub use threads::{check_failsafe, spawn_planner_thread, PlannerHealth};
