use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

use comms::specs::task::{ComputationResult, SimulationTask};
use log::warn;
use rand::{SeedableRng, rngs::StdRng};

use crate::Model;

/// Runs one task, turning any fault into a failed result for its slot.
///
/// # Args
/// * `model` - The model to simulate.
/// * `task` - The replica index and seed.
///
/// # Returns
/// The task's result, never missing even if the model panicked.
pub fn run_task(model: &dyn Model, task: &SimulationTask) -> ComputationResult {
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(task.seed);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| model.simulate(&mut rng)));
    let elapsed = start.elapsed();

    match outcome {
        Ok(Ok(trajectory)) => ComputationResult::completed(task.replica, trajectory, elapsed),
        Ok(Err(e)) => {
            warn!(replica = task.replica; "task failed: {e}");
            ComputationResult::failed(task.replica, e.to_string(), elapsed)
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(replica = task.replica; "task panicked: {reason}");
            ComputationResult::failed(task.replica, format!("task panicked: {reason}"), elapsed)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
