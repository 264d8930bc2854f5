pub mod model;
pub mod queue;
pub mod storage;
pub mod workflow;
