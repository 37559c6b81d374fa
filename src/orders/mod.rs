pub mod coordinator;
pub mod lifecycle;

pub use coordinator::OrderPlacementCoordinator;
pub use lifecycle::{OrderLifecycleService, PaymentGateway, PaymentOutcome, SimulatedPaymentGateway};
