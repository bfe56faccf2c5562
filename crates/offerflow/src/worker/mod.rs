pub mod pool;

pub use pool::{Completed, WorkerPool};
