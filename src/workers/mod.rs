pub mod pool;

pub use pool::{PoolStats, TaskPool};
