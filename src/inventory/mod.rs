pub mod guard;
pub mod lock;

pub use guard::StockGuard;
pub use lock::{LockHandle, LockManager};
