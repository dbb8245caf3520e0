use std::{error::Error, fmt, io};

use comms::CommsErr;
use simulation::SimulationErr;
use tokio::task::JoinError;

/// The slave module's result type.
pub type Result<T> = std::result::Result<T, SlaveErr>;

/// Slave runtime failures. Each one is fatal for the connection it happened on only.
#[derive(Debug)]
pub enum SlaveErr {
    Io(io::Error),
    Comms(CommsErr),
    Simulation(SimulationErr),
    Join(JoinError),
}

impl fmt::Display for SlaveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlaveErr::Io(e) => write!(f, "io error: {e}"),
            SlaveErr::Comms(e) => write!(f, "{e}"),
            SlaveErr::Simulation(e) => write!(f, "{e}"),
            SlaveErr::Join(e) => write!(f, "batch execution was interrupted: {e}"),
        }
    }
}

impl Error for SlaveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SlaveErr::Io(e) => Some(e),
            SlaveErr::Comms(e) => Some(e),
            SlaveErr::Simulation(e) => Some(e),
            SlaveErr::Join(e) => Some(e),
        }
    }
}

impl From<io::Error> for SlaveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CommsErr> for SlaveErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

impl From<SimulationErr> for SlaveErr {
    fn from(value: SimulationErr) -> Self {
        Self::Simulation(value)
    }
}

impl From<JoinError> for SlaveErr {
    fn from(value: JoinError) -> Self {
        Self::Join(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<SlaveErr> for io::Error {
    fn from(value: SlaveErr) -> Self {
        match value {
            SlaveErr::Io(e) => e,
            SlaveErr::Comms(e) => e.into(),
            other => io::Error::other(other),
        }
    }
}
