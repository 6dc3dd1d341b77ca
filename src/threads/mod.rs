//! Worker-thread architecture.
//!
//! One background thread runs the planning ticks; the boundary stages
//! inputs and rings the data-ready condition variable.

pub mod worker;

pub use worker::{check_failsafe, PlannerHealth, PlannerWorker};

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::shared::SharedPlanner;

/// Spawn the planner worker thread over the shared state.
pub fn spawn_planner_thread(shared: Arc<SharedPlanner>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("planner".into())
        .spawn(move || {
            let mut worker = PlannerWorker::new(shared);
            worker.run();
        })
        .expect("Failed to spawn planner thread")
}
