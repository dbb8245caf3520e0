pub mod model;
pub mod network;
pub mod task;
