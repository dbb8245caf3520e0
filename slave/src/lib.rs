mod config;
mod discovery;
mod error;
mod session;
mod slave;

pub use config::SlaveConfig;
pub use error::{Result, SlaveErr};
pub use session::{Session, SessionEnd, SessionState};
pub use slave::Slave;
