pub mod driver;
pub mod integration;
pub mod order;
pub mod repository;

pub use driver::{
    BalanceResult, DriverLookup, ExternalStatus, FailureKind, NormalizedProduct, OrderPayload,
    ProviderDriver, ProviderErrorKind, StatusResult, SubmitResult,
};
pub use integration::{Credential, IntegrationConfig, ProviderKind};
pub use order::{FxSnapshot, NewOrder, Order, PackageRoute};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
