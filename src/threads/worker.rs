//! Planner worker thread.
//!
//! A single background worker executes planning ticks: it sleeps on the
//! data-ready condition variable, snapshots the staged inputs under the
//! running lock, runs the planner and waypoint generator once, and
//! publishes the result. The failsafe turns missing cloud data into
//! hover and, past the termination timeout, into a flight-termination
//! request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::planning::waypoint::WaypointInput;
use crate::shared::{PlannerCore, PlannerInputs, SharedPlanner};

/// Failsafe status of the planner, derived from cloud freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlannerHealth {
    /// Fresh data, planning normally
    #[default]
    Healthy,
    /// No fresh cloud within the critical timeout: hovering
    Critical,
    /// No fresh cloud within the termination timeout: flight
    /// termination requested
    Terminated,
}

/// Classify cloud freshness against the configured timeouts.
///
/// Both clocks must exceed a threshold before it fires, so a vehicle
/// that just started does not trip the failsafe while the first cloud is
/// still in flight.
pub fn check_failsafe(
    since_last_cloud: Duration,
    since_start: Duration,
    config: &PlannerConfig,
) -> PlannerHealth {
    let critical = Duration::from_secs_f32(config.timeout_critical);
    let termination = Duration::from_secs_f32(config.timeout_termination);

    if since_last_cloud > termination && since_start > termination {
        PlannerHealth::Terminated
    } else if since_last_cloud > critical && since_start > critical {
        PlannerHealth::Critical
    } else {
        PlannerHealth::Healthy
    }
}

/// Worker loop state.
pub struct PlannerWorker {
    shared: Arc<SharedPlanner>,
    start: Instant,
}

impl PlannerWorker {
    /// Create a worker over the shared planner state.
    pub fn new(shared: Arc<SharedPlanner>) -> Self {
        Self {
            shared,
            start: Instant::now(),
        }
    }

    /// Run until shutdown is signaled. No tick is interrupted
    /// mid-execution; shutdown is observed between ticks.
    pub fn run(&mut self) {
        tracing::info!("planner thread started");

        loop {
            // wait for data
            {
                let mut ready = self.shared.data_ready.lock();
                while !*ready && !self.shared.shutdown.load(std::sync::atomic::Ordering::Acquire)
                {
                    self.shared.data_ready_cv.wait(&mut ready);
                }
                *ready = false;
            }

            if self
                .shared
                .shutdown
                .load(std::sync::atomic::Ordering::Acquire)
            {
                break;
            }

            let tick_start = Instant::now();
            let mut core = self.shared.core.lock();
            self.run_tick(&mut core);

            tracing::debug!(
                elapsed_ms = tick_start.elapsed().as_millis() as u64,
                "planner tick finished"
            );
        }

        tracing::info!("planner thread shutting down");
    }

    /// Execute one tick under the running lock.
    fn run_tick(&self, core: &mut PlannerCore) {
        // snapshot inputs: later arrivals go to the next tick
        let inputs = std::mem::take(&mut *self.shared.inputs.lock());
        apply_inputs(core, inputs);

        let since_start = self.start.elapsed();
        let since_last_cloud = self
            .shared
            .last_cloud_time
            .lock()
            .as_ref()
            .map(|t| t.elapsed())
            .unwrap_or(since_start);

        let health = check_failsafe(since_last_cloud, since_start, core.planner.config());
        if health != core.health {
            tracing::warn!(?health, "planner health changed");
        }
        core.health = health;

        if health == PlannerHealth::Terminated {
            // no setpoints once termination is requested
            tracing::error!(
                error = %crate::error::PlannerError::Timeout {
                    since_last_cloud_ms: since_last_cloud.as_millis() as u64
                },
                "flight termination requested"
            );
            core.last_waypoint = None;
            return;
        }

        let hover = self.shared.hover.load(std::sync::atomic::Ordering::Acquire)
            || health == PlannerHealth::Critical;

        let now = since_start;
        core.planner.run_planner(now);

        let output = core.planner.avoidance_output();
        let wp_input = WaypointInput {
            position: core.planner.position(),
            yaw: core.planner.yaw(),
            velocity: core.planner.velocity(),
            goal: core.planner.goal(),
            distance_to_closest: core.planner.closest_distance(),
            hover,
            is_airborne: core.planner.is_airborne(),
        };
        core.last_waypoint = Some(core.wp_generator.update(&output, &wp_input, now));
    }
}

/// Apply staged inputs to the planner pair, in the order the boundary
/// would deliver them.
fn apply_inputs(core: &mut PlannerCore, inputs: PlannerInputs) {
    if let Some(config) = inputs.config {
        core.wp_generator.set_config(&config);
        core.planner.set_config(config);
    }
    if let Some(clouds) = inputs.clouds {
        core.planner.set_clouds(clouds);
    }
    if let Some((position, orientation)) = inputs.pose {
        core.planner.set_pose(position, orientation);
    }
    if let Some(velocity) = inputs.velocity {
        core.planner.set_velocity(velocity);
    }
    if let Some((armed, offboard, mission)) = inputs.state {
        core.planner.set_state(armed, offboard, mission);
    }
    if let Some(goal) = inputs.goal {
        core.planner.set_goal(goal);
    }
    if let Some(distance) = inputs.ground_distance {
        core.planner.set_ground_distance(distance);
    }
    if let Some((h, v)) = inputs.fov {
        core.planner.set_fov(h, v);
    }
    if let Some(waypoint) = inputs.last_sent_waypoint {
        core.planner.set_last_sent_waypoint(waypoint);
    }
}
