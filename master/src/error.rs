use std::{error::Error, fmt, io};

use comms::CommsErr;

/// The master module's result type.
pub type Result<T> = std::result::Result<T, MasterErr>;

/// Failures surfaced to the master's caller. Slave faults are recovered
/// internally and never show up here.
#[derive(Debug)]
pub enum MasterErr {
    Io(io::Error),
    Comms(CommsErr),
    InvalidRun(&'static str),
    /// The scheduling loop has stopped.
    SchedulerGone,
}

impl fmt::Display for MasterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterErr::Io(e) => write!(f, "io error: {e}"),
            MasterErr::Comms(e) => write!(f, "{e}"),
            MasterErr::InvalidRun(detail) => write!(f, "invalid run: {detail}"),
            MasterErr::SchedulerGone => write!(f, "the scheduler has stopped"),
        }
    }
}

impl Error for MasterErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MasterErr::Io(e) => Some(e),
            MasterErr::Comms(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MasterErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CommsErr> for MasterErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<MasterErr> for io::Error {
    fn from(value: MasterErr) -> Self {
        match value {
            MasterErr::Io(e) => e,
            MasterErr::Comms(e) => e.into(),
            other => io::Error::other(other),
        }
    }
}
