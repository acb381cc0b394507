pub mod engine;
pub mod retry;
pub mod routing;

pub use engine::{DispatchEngine, DispatchError, DispatchOutcome, FixedRateSource, RateSource};
pub use retry::RetryPolicy;
pub use routing::{RoutingError, RoutingResolver};
