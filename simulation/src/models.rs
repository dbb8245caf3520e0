//! Models shipped with the crate.

use comms::specs::{model::ModelSpec, task::Trajectory};
use rand::{Rng, rngs::StdRng};
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

use crate::{Model, Result, SimulationErr};

/// A linear birth-death process simulated with the direct method.
///
/// Each individual gives birth at `birth_rate` and dies at `death_rate`. A replica
/// stops at `horizon`, on extinction, or after `max_events` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthDeath {
    pub birth_rate: f64,
    pub death_rate: f64,
    pub initial: u64,
    pub horizon: f64,
    pub max_events: usize,
}

impl Default for BirthDeath {
    fn default() -> Self {
        Self {
            birth_rate: 1.0,
            death_rate: 1.1,
            initial: 50,
            horizon: 10.0,
            max_events: 100_000,
        }
    }
}

impl BirthDeath {
    pub const KIND: &'static str = "birth_death";

    /// Builds the model out of `spec`'s parameters, `null` meaning the defaults.
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        let invalid = |detail: String| SimulationErr::InvalidParams {
            kind: Self::KIND.into(),
            detail,
        };

        let model: Option<Self> = spec.params().map_err(|e| invalid(e.to_string()))?;
        let model = model.unwrap_or_default();

        if !(model.birth_rate >= 0.0 && model.death_rate >= 0.0) {
            return Err(invalid("rates must be non negative".into()));
        }

        if !(model.horizon > 0.0 && model.horizon.is_finite()) {
            return Err(invalid(format!("horizon must be positive, got {}", model.horizon)));
        }

        Ok(model)
    }
}

impl Model for BirthDeath {
    fn simulate(&self, rng: &mut StdRng) -> Result<Trajectory> {
        let mut population = self.initial;
        let mut time = 0.0;

        let mut trajectory = Trajectory::default();
        trajectory.push(time, vec![population as f64]);

        for _ in 0..self.max_events {
            let births = self.birth_rate * population as f64;
            let total = births + self.death_rate * population as f64;
            if total <= 0.0 {
                break;
            }

            let wait = Exp::new(total).map_err(|e| SimulationErr::Fault(e.to_string()))?;
            time += wait.sample(rng);
            if time > self.horizon {
                break;
            }

            if rng.random::<f64>() * total < births {
                population += 1;
            } else {
                population -= 1;
            }

            trajectory.push(time, vec![population as f64]);
        }

        Ok(trajectory)
    }
}
