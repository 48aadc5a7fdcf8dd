//! Worker loop and pool supervision.

pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::{Worker, WorkerId};
