//! Shared state between the transport boundary and the planner worker.
//!
//! The boundary stages inputs under one mutex and rings a condition
//! variable when a tick's worth of data is complete; the worker snapshots
//! the staged inputs under the running lock, executes the tick, and
//! publishes the resulting waypoint back through the same lock. Inputs
//! arriving while a tick runs are held for the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::PlannerConfig;
use crate::core::geometry::{Quaternion, Vec3};
use crate::planning::planner::{AvoidanceOutput, LocalPlanner};
use crate::planning::waypoint::{WaypointGenerator, WaypointResult};
use crate::threads::worker::PlannerHealth;

/// Inputs staged by the boundary for the next tick. Fields left `None`
/// keep their previous value inside the planner.
#[derive(Debug, Default)]
pub struct PlannerInputs {
    pub pose: Option<(Vec3, Quaternion)>,
    pub velocity: Option<Vec3>,
    pub goal: Option<Vec3>,
    pub state: Option<(bool, bool, bool)>,
    pub ground_distance: Option<f32>,
    pub clouds: Option<Vec<Vec<Vec3>>>,
    pub fov: Option<(f32, f32)>,
    pub last_sent_waypoint: Option<Vec3>,
    pub config: Option<PlannerConfig>,
}

/// Planner pair guarded by the running lock.
pub(crate) struct PlannerCore {
    pub planner: LocalPlanner,
    pub wp_generator: WaypointGenerator,
    pub last_waypoint: Option<WaypointResult>,
    pub health: PlannerHealth,
}

/// All state shared between the boundary and the worker thread.
pub struct SharedPlanner {
    /// Running lock: one tick at a time, outputs read only between ticks
    pub(crate) core: Mutex<PlannerCore>,
    /// Staged inputs, applied atomically at the start of a tick
    pub(crate) inputs: Mutex<PlannerInputs>,
    /// Data-ready flag paired with the condition variable
    pub(crate) data_ready: Mutex<bool>,
    pub(crate) data_ready_cv: Condvar,
    /// Shutdown signal for graceful termination
    pub(crate) shutdown: AtomicBool,
    /// Hover request from the boundary (failsafe or user)
    pub(crate) hover: AtomicBool,
    /// When the boundary last delivered clouds
    pub(crate) last_cloud_time: Mutex<Option<Instant>>,
}

impl SharedPlanner {
    pub(crate) fn new(config: PlannerConfig) -> Self {
        let mut wp_generator = WaypointGenerator::new();
        wp_generator.set_config(&config);

        Self {
            core: Mutex::new(PlannerCore {
                planner: LocalPlanner::new(config),
                wp_generator,
                last_waypoint: None,
                health: PlannerHealth::Healthy,
            }),
            inputs: Mutex::new(PlannerInputs::default()),
            data_ready: Mutex::new(false),
            data_ready_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            hover: AtomicBool::new(false),
            last_cloud_time: Mutex::new(None),
        }
    }
}

/// Boundary-facing handle: idempotent input setters, the tick trigger,
/// and output accessors. Clones share the same planner.
#[derive(Clone)]
pub struct PlannerHandle {
    shared: Arc<SharedPlanner>,
}

impl PlannerHandle {
    /// Create the shared planner state.
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            shared: Arc::new(SharedPlanner::new(config)),
        }
    }

    /// The shared state, for spawning the worker.
    pub fn shared(&self) -> Arc<SharedPlanner> {
        Arc::clone(&self.shared)
    }

    /// Stage the vehicle pose for the next tick.
    pub fn set_pose(&self, position: Vec3, orientation: Quaternion) {
        self.shared.inputs.lock().pose = Some((position, orientation));
    }

    /// Stage the vehicle velocity for the next tick.
    pub fn set_velocity(&self, velocity: Vec3) {
        self.shared.inputs.lock().velocity = Some(velocity);
    }

    /// Stage a new goal for the next tick.
    pub fn set_goal(&self, goal: Vec3) {
        self.shared.inputs.lock().goal = Some(goal);
    }

    /// Stage the flight-controller state flags.
    pub fn set_state(&self, armed: bool, offboard: bool, mission: bool) {
        self.shared.inputs.lock().state = Some((armed, offboard, mission));
    }

    /// Stage the measured ground clearance.
    pub fn set_ground_distance(&self, distance: f32) {
        self.shared.inputs.lock().ground_distance = Some(distance);
    }

    /// Stage the per-camera clouds (local-origin frame) and record the
    /// delivery time for the failsafe.
    pub fn set_clouds(&self, clouds: Vec<Vec<Vec3>>) {
        self.shared.inputs.lock().clouds = Some(clouds);
        *self.shared.last_cloud_time.lock() = Some(Instant::now());
    }

    /// Stage the camera field of view in degrees.
    pub fn set_fov(&self, h_fov_deg: f32, v_fov_deg: f32) {
        self.shared.inputs.lock().fov = Some((h_fov_deg, v_fov_deg));
    }

    /// Stage the waypoint last sent to the vehicle.
    pub fn set_last_sent_waypoint(&self, waypoint: Vec3) {
        self.shared.inputs.lock().last_sent_waypoint = Some(waypoint);
    }

    /// Stage a configuration change; applied at the next tick boundary.
    pub fn set_config(&self, config: PlannerConfig) {
        self.shared.inputs.lock().config = Some(config);
    }

    /// Request or clear a hover hold.
    pub fn set_hover(&self, hover: bool) {
        self.shared.hover.store(hover, Ordering::Release);
    }

    /// Signal that a tick's worth of inputs is complete. If the worker
    /// is mid-tick the signal coalesces into the next tick.
    pub fn notify_tick(&self) {
        let mut ready = self.shared.data_ready.lock();
        *ready = true;
        self.shared.data_ready_cv.notify_one();
    }

    /// The most recent published waypoint, if any tick has completed.
    pub fn last_waypoint(&self) -> Option<WaypointResult> {
        self.shared.core.lock().last_waypoint.clone()
    }

    /// The most recent avoidance output.
    pub fn avoidance_output(&self) -> AvoidanceOutput {
        self.shared.core.lock().planner.avoidance_output()
    }

    /// Current failsafe health.
    pub fn health(&self) -> PlannerHealth {
        self.shared.core.lock().health
    }

    /// Request worker shutdown; the worker exits at its next wakeup
    /// without interrupting a running tick.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let mut ready = self.shared.data_ready.lock();
        *ready = true;
        self.shared.data_ready_cv.notify_one();
    }
}
