use std::{error::Error, fmt};

/// The simulation module's result type.
pub type Result<T> = std::result::Result<T, SimulationErr>;

/// Failures while building models or running tasks.
#[derive(Debug)]
pub enum SimulationErr {
    UnknownModel(String),
    InvalidParams { kind: String, detail: String },
    Pool(String),
    /// A single task failed internally.
    Fault(String),
}

impl fmt::Display for SimulationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationErr::UnknownModel(kind) => write!(f, "unknown model kind {kind}"),
            SimulationErr::InvalidParams { kind, detail } => {
                write!(f, "invalid parameters for model {kind}: {detail}")
            }
            SimulationErr::Pool(detail) => write!(f, "failed to build the worker pool: {detail}"),
            SimulationErr::Fault(detail) => write!(f, "task fault: {detail}"),
        }
    }
}

impl Error for SimulationErr {}
