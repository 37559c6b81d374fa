pub mod cart;
pub mod context;
pub mod events;
pub mod order;
pub mod product;

pub use cart::*;
pub use context::*;
pub use events::*;
pub use order::*;
pub use product::*;
