use comms::specs::task::Trajectory;
use rand::rngs::StdRng;

use crate::Result;

/// Abstraction over a stochastic model a slave can run replicas of.
///
/// The dispatch layers treat implementations as a black box that maps a random
/// source to a trajectory. State representation, rates and event sampling all
/// live behind this trait.
pub trait Model: Send + Sync {
    /// Runs one replica from the model's initial state to its stopping condition.
    ///
    /// # Args
    /// * `rng` - The replica's random source, seeded from its task.
    ///
    /// # Errors
    /// Returns `SimulationErr::Fault` when the replica can't be completed. Panics are
    /// tolerated by the caller but reporting through the result is preferred.
    fn simulate(&self, rng: &mut StdRng) -> Result<Trajectory>;
}
