mod config;
mod discovery;
mod error;
mod job;
mod link;
mod master;
mod partition;
mod registry;
mod scheduler;
mod state;

pub use config::MasterConfig;
pub use error::{MasterErr, Result};
pub use job::RunOutcome;
pub use master::Master;
pub use partition::{Candidate, allocate};
pub use registry::{SlaveId, SlaveStatus};
pub use state::{MasterState, SlaveSnapshot};
